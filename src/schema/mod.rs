//! Field schemas for filterable entity types.
//!
//! A schema is a closed list of [`FilterField`] descriptors, built once and
//! registered in a [`SchemaRegistry`]. Registration validates every field so
//! a misconfigured schema fails at startup instead of on the first query.

mod fleet;

use crate::error::{QueryError, Result};
use crate::predicate::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use fleet::ActionStatusConverter;

/// Backend value type of an attribute. Drives value conversion and
/// whether text comparisons are case-folded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Number,
    Boolean,
    /// Closed set of constants, stored in their canonical (upper case) form.
    Enumerated(Vec<String>),
}

impl ValueType {
    pub fn enumerated<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::Enumerated(values.into_iter().map(Into::into).collect())
    }
}

/// Maps a raw argument onto a typed backend value.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// `None` when the argument is not one of the accepted values.
    fn convert(&self, raw: &str) -> Option<Value>;

    /// Accepted values, listed in error messages.
    fn possible_values(&self) -> Vec<String>;
}

/// Whether a relation yields at most one related row or many.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Attribute of a related entity reachable as `field.attribute`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubAttribute {
    /// Spelling used in selectors, matched case-insensitively.
    pub name: String,
    /// Attribute name on the related entity.
    pub backend: String,
    pub value_type: ValueType,
}

impl SubAttribute {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            backend: name.clone(),
            name,
            value_type,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Number)
    }

    /// Expose the attribute under a different selector name.
    pub fn aliased(name: impl Into<String>, backend: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            value_type,
        }
    }
}

/// One filterable field of an entity type.
#[derive(Clone, Debug, Serialize)]
pub struct FilterField {
    /// Identifier used in selectors.
    pub name: String,
    /// Root attribute on the persisted entity, never dotted.
    pub backend_path: String,
    pub value_type: ValueType,
    pub is_map: bool,
    pub cardinality: Cardinality,
    pub sub_attributes: Vec<SubAttribute>,
    /// Key and value attribute names of a map entry.
    pub map_key_value: Option<(String, String)>,
    /// Primary key of the owning entity; set by the schema on registration.
    pub identifier: String,
    #[serde(skip)]
    pub converter: Option<Arc<dyn ValueConverter>>,
}

impl FilterField {
    fn base(name: impl Into<String>, backend_path: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            backend_path: backend_path.into(),
            value_type,
            is_map: false,
            cardinality: Cardinality::One,
            sub_attributes: Vec::new(),
            map_key_value: None,
            identifier: String::new(),
            converter: None,
        }
    }

    pub fn text(name: impl Into<String>, backend_path: impl Into<String>) -> Self {
        Self::base(name, backend_path, ValueType::Text)
    }

    pub fn number(name: impl Into<String>, backend_path: impl Into<String>) -> Self {
        Self::base(name, backend_path, ValueType::Number)
    }

    pub fn boolean(name: impl Into<String>, backend_path: impl Into<String>) -> Self {
        Self::base(name, backend_path, ValueType::Boolean)
    }

    pub fn enumerated<I, S>(name: impl Into<String>, backend_path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::base(name, backend_path, ValueType::enumerated(values))
    }

    /// Field pointing at a related entity.
    pub fn relation(
        name: impl Into<String>,
        backend_path: impl Into<String>,
        cardinality: Cardinality,
        sub_attributes: Vec<SubAttribute>,
    ) -> Self {
        let mut field = Self::base(name, backend_path, ValueType::Text);
        field.cardinality = cardinality;
        field.sub_attributes = sub_attributes;
        field
    }

    /// Keyed collection stored as entries with a key and a value attribute.
    pub fn map(
        name: impl Into<String>,
        backend_path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut field = Self::base(name, backend_path, ValueType::Text);
        field.is_map = true;
        field.cardinality = Cardinality::Many;
        field.map_key_value = Some((key.into(), value.into()));
        field
    }

    pub fn with_converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn has_sub_attributes(&self) -> bool {
        !self.sub_attributes.is_empty()
    }

    /// Case-insensitive lookup of a declared sub-attribute.
    pub fn sub_attribute(&self, name: &str) -> Option<&SubAttribute> {
        self.sub_attributes
            .iter()
            .find(|sub| sub.name.eq_ignore_ascii_case(name))
    }

    /// Value type of the attribute a resolved path ends on.
    pub fn value_type_of(&self, sub: Option<&str>) -> &ValueType {
        sub.and_then(|name| self.sub_attributes.iter().find(|s| s.backend == name))
            .map(|s| &s.value_type)
            .unwrap_or(&self.value_type)
    }
}

/// Ordered field list of one entity type.
#[derive(Clone, Debug, Serialize)]
pub struct EntitySchema {
    pub entity: String,
    pub identifier: String,
    pub fields: Vec<FilterField>,
}

impl EntitySchema {
    pub fn new(entity: impl Into<String>, identifier: impl Into<String>, fields: Vec<FilterField>) -> Self {
        let identifier = identifier.into();
        let fields = fields
            .into_iter()
            .map(|mut f| {
                f.identifier = identifier.clone();
                f
            })
            .collect();
        Self {
            entity: entity.into(),
            identifier,
            fields,
        }
    }

    /// Case-insensitive field lookup by selector name.
    pub fn field(&self, name: &str) -> Option<&FilterField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn check(&self) -> Result<()> {
        let fail = |reason: String| QueryError::SchemaMisconfigured {
            entity: self.entity.clone(),
            reason,
        };
        let mut seen = Vec::new();
        for field in &self.fields {
            if field.name.is_empty() || field.name.contains('.') {
                return Err(fail(format!("invalid field name '{}'", field.name)));
            }
            let lower = field.name.to_ascii_lowercase();
            if seen.contains(&lower) {
                return Err(fail(format!("duplicate field '{}'", field.name)));
            }
            seen.push(lower);
            if field.backend_path.is_empty() || field.backend_path.contains('.') {
                return Err(fail(format!(
                    "field '{}' has a dotted or empty backend path '{}'",
                    field.name, field.backend_path
                )));
            }
            if field.is_map {
                if field.map_key_value.is_none() {
                    return Err(fail(format!("map field '{}' declares no key/value pair", field.name)));
                }
                if field.has_sub_attributes() {
                    return Err(fail(format!("map field '{}' cannot declare sub-attributes", field.name)));
                }
            }
            if let ValueType::Enumerated(values) = &field.value_type {
                if values.is_empty() {
                    return Err(fail(format!("enumerated field '{}' has no values", field.name)));
                }
            }
        }
        Ok(())
    }
}

/// Read-only registry of entity schemas, keyed by entity type.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in fleet entity types.
    pub fn fleet() -> Result<Self> {
        let mut registry = Self::new();
        for schema in fleet::schemas() {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Validate and add a schema. Replacing an existing entity type is
    /// rejected.
    pub fn register(&mut self, schema: EntitySchema) -> Result<()> {
        schema.check()?;
        if self.schemas.contains_key(&schema.entity) {
            return Err(QueryError::SchemaMisconfigured {
                entity: schema.entity.clone(),
                reason: "entity type registered twice".to_string(),
            });
        }
        tracing::debug!(entity = %schema.entity, fields = schema.fields.len(), "registered filter schema");
        self.schemas.insert(schema.entity.clone(), Arc::new(schema));
        Ok(())
    }

    /// Schema of an entity type. An unknown type is an internal error.
    pub fn resolve(&self, entity: &str) -> Result<Arc<EntitySchema>> {
        self.schemas
            .get(entity)
            .cloned()
            .ok_or_else(|| QueryError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_registry_resolves_all_entities() {
        let registry = SchemaRegistry::fleet().unwrap();
        let entities: Vec<_> = registry.entities().collect();
        assert_eq!(
            entities,
            vec![
                "action",
                "distribution_set",
                "rollout",
                "software_module",
                "target",
                "target_filter_query"
            ]
        );
        let target = registry.resolve("target").unwrap();
        assert!(target.field("ATTRIBUTE").unwrap().is_map);
        assert_eq!(target.field("tag").unwrap().identifier, "id");
    }

    #[test]
    fn test_unknown_entity_is_internal_error() {
        let registry = SchemaRegistry::fleet().unwrap();
        let err = registry.resolve("robot").unwrap_err();
        assert!(matches!(err, QueryError::UnknownEntity { .. }));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_map_without_key_value_is_rejected() {
        let mut broken = FilterField::map("attr", "attributes", "k", "v");
        broken.map_key_value = None;
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(EntitySchema::new("device", "id", vec![broken]))
            .unwrap_err();
        assert!(matches!(err, QueryError::SchemaMisconfigured { .. }));
    }

    #[test]
    fn test_dotted_backend_path_is_rejected() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(EntitySchema::new(
                "device",
                "id",
                vec![FilterField::text("name", "info.name")],
            ))
            .unwrap_err();
        assert!(err.to_string().contains("dotted"));
    }

    #[test]
    fn test_duplicate_field_names_are_rejected() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(EntitySchema::new(
                "device",
                "id",
                vec![FilterField::text("name", "name"), FilterField::text("NAME", "label")],
            ))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_registering_twice_fails() {
        let mut registry = SchemaRegistry::new();
        let schema = EntitySchema::new("device", "id", vec![FilterField::text("name", "name")]);
        registry.register(schema.clone()).unwrap();
        assert!(registry.register(schema).is_err());
    }
}
