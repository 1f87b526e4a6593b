//! SQLite backend implementation.
//!
//! SqliteBackend executes compiled filters against a SQLite database laid
//! out as described by a [`TableCatalog`].

use super::builder::build_select;
use super::mapping::{TableCatalog, FLEET_DDL};
use crate::error::{QueryError, Result};
use crate::predicate::CompiledFilter;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;

/// SQLite backend implementation.
///
/// `LIKE` is switched to case-sensitive matching on open: case folding is
/// emitted by the compiler as `UPPER(...)` when it is wanted.
#[derive(Debug)]
pub struct SqliteBackend {
    pub(crate) conn: Connection,
    catalog: TableCatalog,
}

impl SqliteBackend {
    /// Open a SQLite database backend.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `catalog` - Table layout of the entity types
    pub fn open(db_path: &Path, catalog: TableCatalog) -> Result<Self> {
        Self::from_connection(Connection::open(db_path)?, catalog)
    }

    /// Wrap an already opened connection.
    pub fn from_connection(conn: Connection, catalog: TableCatalog) -> Result<Self> {
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        Ok(Self { conn, catalog })
    }

    /// Create the fleet tables if they do not exist yet.
    pub fn init_fleet_schema(&self) -> Result<()> {
        self.conn.execute_batch(FLEET_DDL)?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a target described as a JSON object and return its row id.
    ///
    /// Recognized keys: `controllerId` (required), `name`, `description`,
    /// `updateStatus`, `createdAt`, `lastModifiedAt`, `tag` (list of tag
    /// names), `attribute` and `metadata` (string maps) and `assignedDs`
    /// (`{name, version}`). Tags and distribution sets are created on first
    /// use and shared by name afterwards.
    pub fn insert_target(&self, record: &JsonValue) -> Result<i64> {
        let controller_id = record
            .get("controllerId")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| QueryError::Internal {
                reason: format!("target record without a controllerId: {}", record),
            })?;
        let text = |key: &str| record.get(key).and_then(JsonValue::as_str);
        let number = |key: &str| record.get(key).and_then(JsonValue::as_i64);

        let assigned = match record.get("assignedDs") {
            Some(ds) => Some(self.distribution_set_id(ds)?),
            None => None,
        };
        self.conn.execute(
            "INSERT INTO targets (controller_id, name, description, update_status, created_at, last_modified_at, assigned_distribution_set)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                controller_id,
                text("name"),
                text("description"),
                text("updateStatus"),
                number("createdAt"),
                number("lastModifiedAt"),
                assigned
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        for tag in record.get("tag").and_then(JsonValue::as_array).into_iter().flatten() {
            if let Some(name) = tag.as_str() {
                let tag_id = self.named_row("target_tags", name)?;
                self.conn.execute(
                    "INSERT INTO target_tag_links (target_id, tag_id) VALUES (?1, ?2)",
                    params![id, tag_id],
                )?;
            }
        }
        for (table, key) in [("target_attributes", "attribute"), ("target_metadata", "metadata")] {
            let Some(entries) = record.get(key).and_then(JsonValue::as_object) else {
                continue;
            };
            let columns = if table == "target_attributes" {
                "(target_id, attribute_key, attribute_value)"
            } else {
                "(target_id, meta_key, meta_value)"
            };
            let sql = format!("INSERT INTO {} {} VALUES (?1, ?2, ?3)", table, columns);
            for (entry_key, value) in entries {
                self.conn.execute(&sql, params![id, entry_key, value.as_str()])?;
            }
        }
        tracing::trace!(controller_id, id, "inserted target");
        Ok(id)
    }

    fn named_row(&self, table: &str, name: &str) -> Result<i64> {
        let existing = self
            .conn
            .query_row(&format!("SELECT id FROM {} WHERE name = ?1", table), params![name], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute(&format!("INSERT INTO {} (name) VALUES (?1)", table), params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn distribution_set_id(&self, ds: &JsonValue) -> Result<i64> {
        let name = ds.get("name").and_then(JsonValue::as_str).unwrap_or_default();
        let version = ds.get("version").and_then(JsonValue::as_str);
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM distribution_sets WHERE name = ?1 AND version IS ?2",
                params![name, version],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO distribution_sets (name, version) VALUES (?1, ?2)",
            params![name, version],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl super::FilterBackend for SqliteBackend {
    fn search(&self, filter: &CompiledFilter, limit: Option<usize>) -> Result<Vec<i64>> {
        let mapping = self.catalog.mapping(&filter.entity)?;
        let (sql, params) = build_select(filter, mapping, false, limit)?;
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| row.get::<_, i64>(0))?;
        let ids = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn count(&self, filter: &CompiledFilter) -> Result<u64> {
        let mapping = self.catalog.mapping(&filter.entity)?;
        let (sql, params) = build_select(filter, mapping, true, None)?;
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
