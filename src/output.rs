use crate::predicate::CompiledFilter;
use crate::schema::{EntitySchema, FilterField, ValueType};
use crate::suggest::ValidationContext;
use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Pretty,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            OutputFormat::Human => "human",
            OutputFormat::Json => "json",
            OutputFormat::Pretty => "pretty",
        };
        write!(f, "{}", value)
    }
}

#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub schema_version: &'static str,
    pub execution_id: String,
    pub tool: &'static str,
    pub timestamp: String,
    pub partial: bool,
    pub data: T,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
    pub message: String,
    pub remediation: Option<String>,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub entity: String,
    pub query: String,
    /// Canonical form of the parsed query.
    pub normalized: String,
    pub comparisons: usize,
}

#[derive(Serialize)]
pub struct CompileResponse {
    pub entity: String,
    pub query: String,
    pub filter_id: String,
    pub rendered: String,
    pub filter: CompiledFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

#[derive(Serialize)]
pub struct SuggestResponse {
    pub entity: String,
    pub query: String,
    pub cursor: usize,
    #[serde(flatten)]
    pub context: ValidationContext,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub entity: String,
    pub query: String,
    pub filter_id: String,
    pub results: Vec<i64>,
    pub total_count: u64,
}

#[derive(Serialize)]
pub struct MatchResponse {
    pub entity: String,
    pub query: String,
    /// Positions of the matching records in the input.
    pub matched: Vec<usize>,
    pub total_records: usize,
}

#[derive(Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_attributes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl FieldInfo {
    pub fn describe(field: &FilterField) -> Self {
        let kind = if field.is_map {
            "map"
        } else if field.has_sub_attributes() {
            "relation"
        } else if field.converter.is_some() {
            "converted"
        } else {
            match field.value_type {
                ValueType::Text => "text",
                ValueType::Number => "number",
                ValueType::Boolean => "boolean",
                ValueType::Enumerated(_) => "enum",
            }
        };
        let values = match (&field.value_type, &field.converter) {
            (_, Some(converter)) => Some(converter.possible_values()),
            (ValueType::Enumerated(values), None) => Some(values.iter().map(|v| v.to_ascii_lowercase()).collect()),
            _ => None,
        };
        Self {
            name: field.name.clone(),
            kind: kind.to_string(),
            sub_attributes: field.sub_attributes.iter().map(|s| s.name.clone()).collect(),
            values,
        }
    }
}

#[derive(Serialize)]
pub struct FieldsResponse {
    pub entity: String,
    pub fields: Vec<FieldInfo>,
}

impl FieldsResponse {
    pub fn from_schema(schema: &EntitySchema) -> Self {
        Self {
            entity: schema.entity.clone(),
            fields: schema.fields.iter().map(FieldInfo::describe).collect(),
        }
    }
}

pub fn json_response<T>(data: T) -> JsonResponse<T> {
    json_response_with_partial(data, false)
}

pub fn json_response_with_partial<T>(data: T, partial: bool) -> JsonResponse<T> {
    JsonResponse {
        schema_version: SCHEMA_VERSION,
        execution_id: execution_id(),
        tool: "fleetql",
        timestamp: Utc::now().to_rfc3339(),
        partial,
        data,
    }
}

pub fn execution_id() -> String {
    let timestamp = Utc::now().timestamp();
    let pid = std::process::id();
    format!("{:x}-{:x}", timestamp, pid)
}

/// Stable id of a compiled filter: first 8 bytes of the SHA-256 of its
/// rendered form, hex encoded. Equal filters get equal ids across runs.
pub fn filter_id(filter: &CompiledFilter) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filter.entity.as_bytes());
    hasher.update(b":");
    hasher.update(filter.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QueryEngine;
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_filter_id_is_stable_and_short() {
        let engine = QueryEngine::new(SchemaRegistry::fleet().unwrap());
        let a = engine.compile("target", "name==a*").unwrap();
        let b = engine.compile("target", "NAME==A*").unwrap();
        let c = engine.compile("target", "name==b*").unwrap();
        assert_eq!(filter_id(&a), filter_id(&b));
        assert_ne!(filter_id(&a), filter_id(&c));
        assert_eq!(filter_id(&a).len(), 16);
    }

    #[test]
    fn test_json_response_envelope() {
        let response = json_response(vec![1, 2]);
        assert_eq!(response.schema_version, "1.0.0");
        assert_eq!(response.tool, "fleetql");
        assert!(!response.partial);
        assert!(response.execution_id.contains('-'));
    }

    #[test]
    fn test_field_info_kinds() {
        let registry = SchemaRegistry::fleet().unwrap();
        let fields = FieldsResponse::from_schema(&registry.resolve("action").unwrap());
        let status = fields.fields.iter().find(|f| f.name == "status").unwrap();
        assert_eq!(status.kind, "converted");
        assert_eq!(status.values.as_deref(), Some(&["pending".to_string(), "finished".to_string()][..]));
        let target = fields.fields.iter().find(|f| f.name == "target").unwrap();
        assert_eq!(target.kind, "relation");
        assert_eq!(target.sub_attributes, vec!["controllerid", "name"]);
    }
}
