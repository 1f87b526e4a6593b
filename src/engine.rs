//! Entry point tying parser, schemas, macros and compiler together.

use crate::ast::Node;
use crate::error::Result;
use crate::macros::{MacroExpander, MacroLookup};
use crate::parser::parse;
use crate::predicate::CompiledFilter;
use crate::query::{self, FieldDataProvider, JsonRecordProvider, QueryOptions};
use crate::schema::SchemaRegistry;
use crate::suggest::{SuggestionOracle, ValidationContext};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Compiles, validates and matches filters for the registered entity types.
///
/// The engine is immutable once built and can be shared between threads;
/// every call works on its own parse tree and join context.
#[derive(Debug)]
pub struct QueryEngine {
    registry: SchemaRegistry,
    options: QueryOptions,
    expander: Option<MacroExpander>,
}

impl QueryEngine {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            options: QueryOptions::default(),
            expander: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Expand macros through `lookup`, using the unknown-macro policy of the
    /// current options.
    pub fn with_macros(mut self, lookup: Arc<dyn MacroLookup>) -> Result<Self> {
        self.expander = Some(MacroExpander::new(lookup, self.options.unknown_macros)?);
        Ok(self)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn options(&self) -> QueryOptions {
        self.options
    }

    /// Parse without looking at any schema.
    pub fn parse(&self, query: &str) -> Result<Node> {
        Ok(parse(query)?)
    }

    /// Parse and check every selector against the schema of `entity`.
    pub fn validate(&self, entity: &str, query: &str) -> Result<Node> {
        let schema = self.registry.resolve(entity)?;
        let tree = self.parse(query)?;
        query::validate(&tree, &schema)?;
        Ok(tree)
    }

    pub fn compile(&self, entity: &str, query: &str) -> Result<CompiledFilter> {
        let tree = self.parse(query)?;
        self.compile_tree(entity, &tree)
    }

    pub fn compile_tree(&self, entity: &str, tree: &Node) -> Result<CompiledFilter> {
        let schema = self.registry.resolve(entity)?;
        query::compile(tree, &schema, self.options, self.expander.as_ref())
    }

    /// Completion candidates for `query` at byte offset `cursor`.
    pub fn suggest(&self, entity: &str, query: &str, cursor: usize) -> ValidationContext {
        let schema = match self.registry.resolve(entity) {
            Ok(schema) => schema,
            Err(err) => {
                tracing::trace!(entity, error = %err, "no schema for suggestions");
                return ValidationContext {
                    is_syntax_error: false,
                    suggestions: Vec::new(),
                    error_message: Some(err.to_string()),
                };
            }
        };
        let mut oracle = SuggestionOracle::new(&schema).with_options(self.options);
        if let Some(expander) = &self.expander {
            oracle = oracle.with_expander(expander);
        }
        oracle.suggest(query, cursor)
    }

    /// Parse `query`, validate it against `entity` and return a reusable
    /// in-memory matcher.
    pub fn matcher(&self, entity: &str, query: &str) -> Result<RecordMatcher<'_>> {
        let tree = self.validate(entity, query)?;
        Ok(RecordMatcher { engine: self, tree })
    }
}

/// A validated filter evaluated against in-memory records.
#[derive(Debug)]
pub struct RecordMatcher<'e> {
    engine: &'e QueryEngine,
    tree: Node,
}

impl RecordMatcher<'_> {
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    /// Evaluate against a JSON record.
    pub fn matches(&self, record: &JsonValue) -> bool {
        let mut provider = JsonRecordProvider::new(record).with_options(self.engine.options);
        if let Some(expander) = &self.engine.expander {
            provider = provider.with_expander(expander);
        }
        query::matches(&self.tree, &provider)
    }

    /// Evaluate with a caller-supplied provider.
    pub fn matches_with<P: FieldDataProvider + ?Sized>(&self, provider: &P) -> bool {
        query::matches(&self.tree, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::macros::StaticMacros;
    use serde_json::json;

    fn engine() -> QueryEngine {
        QueryEngine::new(SchemaRegistry::fleet().unwrap())
    }

    #[test]
    fn test_compile_reports_parse_failures_as_syntax_errors() {
        let err = engine().compile("target", "name==").unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
        assert!(err.to_string().contains("position 6"));
    }

    #[test]
    fn test_unknown_entity_is_not_a_client_error() {
        let err = engine().compile("robot", "name==x").unwrap_err();
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_matcher_validates_first() {
        let engine = engine();
        assert!(matches!(
            engine.matcher("target", "colour==red").unwrap_err(),
            QueryError::UnsupportedField { .. }
        ));
        let matcher = engine.matcher("target", "name==web*;tag==prod").unwrap();
        assert!(matcher.matches(&json!({"name": "web-1", "tag": ["prod", "eu"]})));
        assert!(!matcher.matches(&json!({"name": "db-1", "tag": ["prod"]})));
    }

    #[test]
    fn test_macros_reach_matcher_and_compiler() {
        let engine = engine()
            .with_macros(Arc::new(StaticMacros::default().with("now_ts", "2000")))
            .unwrap();
        let filter = engine.compile("target", "createdat=lt=${now_ts}").unwrap();
        assert_eq!(filter.predicate.to_string(), "t0.created_at < '2000'");

        let matcher = engine.matcher("target", "createdat=lt=${now_ts}").unwrap();
        assert!(matcher.matches(&json!({"createdAt": 1500})));
        assert!(!matcher.matches(&json!({"createdAt": 2500})));
    }

    #[test]
    fn test_suggest_on_unknown_entity_does_not_fail() {
        let context = engine().suggest("robot", "name", 4);
        assert!(context.suggestions.is_empty());
        assert!(context.error_message.is_some());
    }
}
