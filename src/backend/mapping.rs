//! Table layout of the entity types.
//!
//! Attributes of a compiled filter are column names. Relations need to know
//! how the related rows are reached from the owning row.

use crate::error::{QueryError, Result};
use std::collections::HashMap;

/// How a relation attribute reaches its rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// The owning row holds a foreign key to the related row.
    ManyToOne { fk_column: String },
    /// Related rows point back at their owner.
    OneToMany { owner_column: String },
    /// Rows are linked through a separate table.
    ManyToMany {
        link_table: String,
        owner_column: String,
        related_column: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationTable {
    pub table: String,
    pub id_column: String,
    pub kind: RelationKind,
}

impl RelationTable {
    pub fn many_to_one(table: &str, fk_column: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: "id".to_string(),
            kind: RelationKind::ManyToOne {
                fk_column: fk_column.to_string(),
            },
        }
    }

    pub fn one_to_many(table: &str, owner_column: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: "id".to_string(),
            kind: RelationKind::OneToMany {
                owner_column: owner_column.to_string(),
            },
        }
    }

    pub fn many_to_many(table: &str, link_table: &str, owner_column: &str, related_column: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: "id".to_string(),
            kind: RelationKind::ManyToMany {
                link_table: link_table.to_string(),
                owner_column: owner_column.to_string(),
                related_column: related_column.to_string(),
            },
        }
    }
}

/// Table of one entity type plus its relations, keyed by relation attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableMapping {
    pub entity: String,
    pub table: String,
    pub id_column: String,
    pub relations: HashMap<String, RelationTable>,
}

impl TableMapping {
    pub fn new(entity: &str, table: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: table.to_string(),
            id_column: "id".to_string(),
            relations: HashMap::new(),
        }
    }

    pub fn relation(mut self, attribute: &str, table: RelationTable) -> Self {
        self.relations.insert(attribute.to_string(), table);
        self
    }

    pub fn relation_table(&self, attribute: &str) -> Result<&RelationTable> {
        self.relations.get(attribute).ok_or_else(|| QueryError::MissingMapping {
            reason: format!("no table mapping for relation '{}' of '{}'", attribute, self.entity),
        })
    }
}

/// Table mappings of all entity types.
#[derive(Clone, Debug, Default)]
pub struct TableCatalog {
    mappings: HashMap<String, TableMapping>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mapping: TableMapping) -> Self {
        self.mappings.insert(mapping.entity.clone(), mapping);
        self
    }

    pub fn mapping(&self, entity: &str) -> Result<&TableMapping> {
        self.mappings.get(entity).ok_or_else(|| QueryError::MissingMapping {
            reason: format!("no table mapping for entity type '{}'", entity),
        })
    }

    /// Tables of the built-in fleet schemas, matching [`FLEET_DDL`].
    pub fn fleet() -> Self {
        let ds_ref = |fk: &str| RelationTable::many_to_one("distribution_sets", fk);
        Self::new()
            .with(
                TableMapping::new("target", "targets")
                    .relation("controller_attributes", RelationTable::one_to_many("target_attributes", "target_id"))
                    .relation("metadata", RelationTable::one_to_many("target_metadata", "target_id"))
                    .relation("assigned_distribution_set", ds_ref("assigned_distribution_set"))
                    .relation("installed_distribution_set", ds_ref("installed_distribution_set"))
                    .relation(
                        "tags",
                        RelationTable::many_to_many("target_tags", "target_tag_links", "target_id", "tag_id"),
                    )
                    .relation("target_type", RelationTable::many_to_one("target_types", "target_type")),
            )
            .with(
                TableMapping::new("distribution_set", "distribution_sets")
                    .relation("ds_type", RelationTable::many_to_one("ds_types", "ds_type"))
                    .relation("tags", RelationTable::many_to_many("ds_tags", "ds_tag_links", "ds_id", "tag_id"))
                    .relation("metadata", RelationTable::one_to_many("ds_metadata", "ds_id"))
                    .relation(
                        "modules",
                        RelationTable::many_to_many("software_modules", "ds_modules", "ds_id", "module_id"),
                    ),
            )
            .with(
                TableMapping::new("software_module", "software_modules")
                    .relation("sm_type", RelationTable::many_to_one("sm_types", "sm_type"))
                    .relation("metadata", RelationTable::one_to_many("sm_metadata", "sm_id")),
            )
            .with(TableMapping::new("rollout", "rollouts").relation("distribution_set", ds_ref("distribution_set")))
            .with(
                TableMapping::new("action", "actions")
                    .relation("target", RelationTable::many_to_one("targets", "target"))
                    .relation("distribution_set", ds_ref("distribution_set"))
                    .relation("rollout", RelationTable::many_to_one("rollouts", "rollout")),
            )
            .with(
                TableMapping::new("target_filter_query", "target_filter_queries")
                    .relation("auto_assign_distribution_set", ds_ref("auto_assign_distribution_set")),
            )
    }
}

/// Schema of a database holding the fleet entity types.
pub const FLEET_DDL: &str = "
CREATE TABLE IF NOT EXISTS distribution_sets (
    id INTEGER PRIMARY KEY,
    name TEXT,
    version TEXT,
    description TEXT,
    created_at INTEGER,
    last_modified_at INTEGER,
    ds_type INTEGER REFERENCES ds_types(id),
    complete INTEGER,
    valid INTEGER
);
CREATE TABLE IF NOT EXISTS ds_types (id INTEGER PRIMARY KEY, type_key TEXT, name TEXT);
CREATE TABLE IF NOT EXISTS ds_tags (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE IF NOT EXISTS ds_tag_links (ds_id INTEGER, tag_id INTEGER);
CREATE TABLE IF NOT EXISTS ds_metadata (ds_id INTEGER, meta_key TEXT, meta_value TEXT);
CREATE TABLE IF NOT EXISTS ds_modules (ds_id INTEGER, module_id INTEGER);

CREATE TABLE IF NOT EXISTS software_modules (
    id INTEGER PRIMARY KEY,
    name TEXT,
    version TEXT,
    description TEXT,
    vendor TEXT,
    sm_type INTEGER REFERENCES sm_types(id)
);
CREATE TABLE IF NOT EXISTS sm_types (id INTEGER PRIMARY KEY, type_key TEXT, name TEXT);
CREATE TABLE IF NOT EXISTS sm_metadata (sm_id INTEGER, meta_key TEXT, meta_value TEXT);

CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY,
    controller_id TEXT NOT NULL UNIQUE,
    name TEXT,
    description TEXT,
    created_at INTEGER,
    last_modified_at INTEGER,
    update_status TEXT,
    address TEXT,
    assigned_distribution_set INTEGER REFERENCES distribution_sets(id),
    installed_distribution_set INTEGER REFERENCES distribution_sets(id),
    last_target_query INTEGER,
    target_type INTEGER REFERENCES target_types(id)
);
CREATE TABLE IF NOT EXISTS target_types (id INTEGER PRIMARY KEY, type_key TEXT, name TEXT);
CREATE TABLE IF NOT EXISTS target_attributes (target_id INTEGER, attribute_key TEXT, attribute_value TEXT);
CREATE TABLE IF NOT EXISTS target_metadata (target_id INTEGER, meta_key TEXT, meta_value TEXT);
CREATE TABLE IF NOT EXISTS target_tags (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE IF NOT EXISTS target_tag_links (target_id INTEGER, tag_id INTEGER);

CREATE TABLE IF NOT EXISTS rollouts (
    id INTEGER PRIMARY KEY,
    name TEXT,
    description TEXT,
    status TEXT,
    distribution_set INTEGER REFERENCES distribution_sets(id)
);
CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY,
    active INTEGER,
    status TEXT,
    last_modified_at INTEGER,
    target INTEGER REFERENCES targets(id),
    distribution_set INTEGER REFERENCES distribution_sets(id),
    rollout INTEGER REFERENCES rollouts(id)
);
CREATE TABLE IF NOT EXISTS target_filter_queries (
    id INTEGER PRIMARY KEY,
    name TEXT,
    query TEXT,
    auto_assign_distribution_set INTEGER REFERENCES distribution_sets(id)
);

CREATE TABLE IF NOT EXISTS tenant_configuration (tenant TEXT, conf_key TEXT, conf_value TEXT);
";
