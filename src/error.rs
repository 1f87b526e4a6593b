//! Error types for fleetql.
//!
//! Error codes are organized by category:
//!
//! - **QL-E100 to QL-E199**: Client query errors (syntax, unsupported fields)
//! - **QL-E200 to QL-E299**: Schema and catalog misconfiguration
//! - **QL-E300 to QL-E399**: Tenant configuration errors
//! - **QL-E900 to QL-E999**: Internal and I/O errors
//!
//! Only the `QL-E1xx` range is caused by the caller's input. Everything else
//! is a server-side fault and should never be reported as a bad request.

use thiserror::Error;

/// Main error type for fleetql operations.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query text or one of its values is malformed.
    #[error("Syntax error: {message}")]
    Syntax { message: String },

    /// A selector or a value does not match the entity schema.
    #[error("Unsupported field: {message}")]
    UnsupportedField { message: String },

    /// No schema is registered for the requested entity type.
    #[error("No filter schema registered for entity type '{entity}'")]
    UnknownEntity { entity: String },

    /// A schema failed its registration checks.
    #[error("Invalid schema for '{entity}': {reason}")]
    SchemaMisconfigured { entity: String, reason: String },

    /// The relational catalog cannot lower a compiled filter.
    #[error("Missing table mapping: {reason}")]
    MissingMapping { reason: String },

    /// Tenant configuration could not be read or parsed.
    #[error("Invalid tenant configuration for '{tenant}': {reason}")]
    TenantConfig { tenant: String, reason: String },

    /// Invariant violation inside fleetql itself.
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error occurred.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        QueryError::Syntax {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        QueryError::UnsupportedField {
            message: message.into(),
        }
    }

    /// Returns the error code for this error.
    pub const fn error_code(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } => "QL-E101",
            QueryError::UnsupportedField { .. } => "QL-E102",
            QueryError::UnknownEntity { .. } => "QL-E201",
            QueryError::SchemaMisconfigured { .. } => "QL-E202",
            QueryError::MissingMapping { .. } => "QL-E203",
            QueryError::TenantConfig { .. } => "QL-E301",
            QueryError::Internal { .. } => "QL-E900",
            QueryError::Io(_) => "QL-E901",
            QueryError::Sqlite(_) => "QL-E902",
            QueryError::Json(_) => "QL-E903",
        }
    }

    /// Returns the severity level for this error.
    pub const fn severity(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } | QueryError::UnsupportedField { .. } => "warning",
            _ => "error",
        }
    }

    /// True for errors caused by the query itself (4xx-equivalent).
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueryError::Syntax { .. } | QueryError::UnsupportedField { .. }
        )
    }

    /// Returns remediation hints for this error, if available.
    pub const fn remediation(&self) -> Option<&'static str> {
        match self {
            QueryError::Syntax { .. } => Some(
                "Use 'field==value' comparisons joined with ';' (and) or ',' (or). \
                 Map fields need a key, e.g. 'attribute.hwRevision==2'.",
            ),
            QueryError::UnsupportedField { .. } => {
                Some("Run 'fleetql fields --entity <type>' to list the filterable fields.")
            }
            QueryError::UnknownEntity { .. } => {
                Some("Valid entity types: target, distribution_set, software_module, rollout, action, target_filter_query")
            }
            QueryError::SchemaMisconfigured { .. } => {
                Some("Map fields must declare a key/value pair and no sub-attributes.")
            }
            QueryError::MissingMapping { .. } => {
                Some("Register a table mapping for every relation the schema exposes.")
            }
            QueryError::TenantConfig { .. } => {
                Some("Polling intervals use the HH:MM:SS format, e.g. 00:05:00.")
            }
            QueryError::Internal { .. } => None,
            QueryError::Io(_) => Some("Check file permissions and disk space."),
            QueryError::Sqlite(_) => {
                Some("The database may be locked or missing tables. Try 'fleetql init-db'.")
            }
            QueryError::Json(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_classified() {
        assert!(QueryError::syntax("x").is_client_error());
        assert!(QueryError::unsupported("x").is_client_error());
        let internal = QueryError::UnknownEntity {
            entity: "robot".to_string(),
        };
        assert!(!internal.is_client_error());
        assert_eq!(internal.severity(), "error");
    }

    #[test]
    fn test_error_codes_are_unique() {
        let errors = [
            QueryError::syntax("a"),
            QueryError::unsupported("a"),
            QueryError::UnknownEntity {
                entity: "a".into(),
            },
            QueryError::SchemaMisconfigured {
                entity: "a".into(),
                reason: "b".into(),
            },
            QueryError::MissingMapping { reason: "a".into() },
            QueryError::TenantConfig {
                tenant: "a".into(),
                reason: "b".into(),
            },
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_message_embeds_detail() {
        let err = QueryError::unsupported("'color' is not a valid field");
        assert_eq!(err.to_string(), "Unsupported field: 'color' is not a valid field");
    }
}
