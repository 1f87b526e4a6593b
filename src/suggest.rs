//! Completion candidates for partial or malformed queries.
//!
//! The oracle works from the typed [`ParseFailure`]: the token in front of
//! the failure position and the token kinds the parser would have accepted.
//! It never fails; anything it cannot classify ends up as a message without
//! suggestions.

use crate::ast::Operator;
use crate::macros::MacroExpander;
use crate::parser::{parse, ParseFailure, TokenKind, TokenSpan};
use crate::query::{compile, QueryOptions};
use crate::schema::{EntitySchema, FilterField};
use serde::Serialize;

pub const LOGICAL_OPERATORS: [&str; 2] = ["and", "or"];

/// A candidate completion replacing `begin..end` of the query (byte
/// offsets). `context` is the partial text the candidate would replace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuggestionToken {
    pub begin: usize,
    pub end: usize,
    pub context: Option<String>,
    pub suggestion: String,
}

impl SuggestionToken {
    fn new(begin: usize, suggestion: &str, context: Option<&str>) -> Self {
        Self {
            begin,
            end: begin + suggestion.len(),
            context: context.map(str::to_string),
            suggestion: suggestion.to_string(),
        }
    }
}

/// Outcome of checking a query for an editor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationContext {
    pub is_syntax_error: bool,
    pub suggestions: Vec<SuggestionToken>,
    pub error_message: Option<String>,
}

/// Suggests completions against one entity schema.
pub struct SuggestionOracle<'a> {
    schema: &'a EntitySchema,
    options: QueryOptions,
    expander: Option<&'a MacroExpander>,
}

impl<'a> SuggestionOracle<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self {
            schema,
            options: QueryOptions::default(),
            expander: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_expander(mut self, expander: &'a MacroExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Check `query` up to `cursor` and propose completions.
    pub fn suggest(&self, query: &str, cursor: usize) -> ValidationContext {
        let mut cut = cursor.min(query.len());
        while !query.is_char_boundary(cut) {
            cut -= 1;
        }
        let text = &query[..cut];

        let tree = match parse(text) {
            Ok(tree) => tree,
            Err(failure) => return self.from_failure(&failure),
        };
        match compile(&tree, self.schema, self.options, self.expander) {
            Ok(_) => {
                let suggestions = if text.ends_with(char::is_whitespace) {
                    LOGICAL_OPERATORS
                        .iter()
                        .map(|op| SuggestionToken::new(text.len(), op, None))
                        .collect()
                } else {
                    Vec::new()
                };
                ValidationContext {
                    is_syntax_error: false,
                    suggestions,
                    error_message: None,
                }
            }
            Err(err) => {
                tracing::trace!(query = text, error = %err, "query does not compile, no suggestions");
                ValidationContext {
                    is_syntax_error: true,
                    suggestions: Vec::new(),
                    error_message: Some(err.to_string()),
                }
            }
        }
    }

    fn from_failure(&self, failure: &ParseFailure) -> ValidationContext {
        let suggestions = self
            .field_suggestions(failure)
            .unwrap_or_else(|| self.expected_suggestions(failure));
        let error_message = if suggestions.is_empty() {
            failure.to_string()
        } else {
            let mut texts: Vec<&str> = Vec::new();
            for token in &suggestions {
                if !texts.contains(&token.suggestion.as_str()) {
                    texts.push(&token.suggestion);
                }
            }
            format!("{} Was expecting: {}", failure.position_message(), texts.join(","))
        };
        ValidationContext {
            is_syntax_error: true,
            suggestions,
            error_message: Some(error_message),
        }
    }

    /// Completions for a selector-like token that should be followed by a
    /// comparator. `None` when the token is a usable selector already.
    fn field_suggestions(&self, failure: &ParseFailure) -> Option<Vec<SuggestionToken>> {
        if !failure.expects(TokenKind::Comparator) {
            return None;
        }
        let token = failure.previous.as_ref()?;

        let Some((root, sub)) = token.text.split_once('.') else {
            return match self.schema.field(&token.text) {
                None => Some(self.field_names(token)),
                Some(field) if field.is_map || field.has_sub_attributes() => {
                    let mut out = vec![SuggestionToken::new(token.end, ".", None)];
                    if field.sub_attributes.len() == 1 {
                        out.extend(comparators(failure));
                    }
                    Some(out)
                }
                Some(_) => None,
            };
        };

        let Some(field) = self.schema.field(root) else {
            return Some(self.field_names(token));
        };
        if field.is_map || !field.has_sub_attributes() || field.sub_attribute(sub).is_some() {
            return None;
        }
        Some(sub_attributes(field, token.start + root.len() + 1, sub))
    }

    fn field_names(&self, token: &TokenSpan) -> Vec<SuggestionToken> {
        self.schema
            .fields
            .iter()
            .map(|field| SuggestionToken::new(token.start, &field.name, Some(&token.text)))
            .collect()
    }

    fn expected_suggestions(&self, failure: &ParseFailure) -> Vec<SuggestionToken> {
        let context = failure.found.as_deref();
        let mut out = Vec::new();
        for kind in &failure.expected {
            match kind {
                TokenKind::Comparator => out.extend(comparators(failure)),
                TokenKind::LogicalOperator => out.extend(
                    LOGICAL_OPERATORS
                        .iter()
                        .map(|op| SuggestionToken::new(failure.offset, op, context)),
                ),
                TokenKind::Selector => out.extend(
                    self.schema
                        .fields
                        .iter()
                        .map(|field| SuggestionToken::new(failure.offset, &field.name, context)),
                ),
                TokenKind::OpenParen => out.push(SuggestionToken::new(failure.offset, "(", context)),
                TokenKind::CloseParen => out.push(SuggestionToken::new(failure.offset, ")", context)),
                TokenKind::Argument | TokenKind::EndOfInput => {}
            }
        }
        out
    }
}

fn comparators(failure: &ParseFailure) -> impl Iterator<Item = SuggestionToken> + '_ {
    Operator::ALL
        .iter()
        .map(move |op| SuggestionToken::new(failure.offset, op.symbol(), failure.found.as_deref()))
}

fn sub_attributes(field: &FilterField, begin: usize, partial: &str) -> Vec<SuggestionToken> {
    field
        .sub_attributes
        .iter()
        .map(|sub| SuggestionToken::new(begin, &sub.name, Some(partial)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn oracle_check(query: &str) -> ValidationContext {
        let registry = SchemaRegistry::fleet().unwrap();
        let schema = registry.resolve("target").unwrap();
        SuggestionOracle::new(&schema).suggest(query, query.len())
    }

    fn texts(context: &ValidationContext) -> Vec<&str> {
        context.suggestions.iter().map(|s| s.suggestion.as_str()).collect()
    }

    #[test]
    fn test_complete_clause_with_trailing_space_offers_connectors() {
        let context = oracle_check("name==a ");
        assert!(!context.is_syntax_error);
        assert_eq!(texts(&context), vec!["and", "or"]);
        assert_eq!(context.suggestions[0].begin, 8);
        assert_eq!(context.suggestions[0].end, 11);
        assert_eq!(context.suggestions[1].end, 10);
        assert_eq!(context.error_message, None);
    }

    #[test]
    fn test_complete_clause_without_space_has_no_suggestions() {
        let context = oracle_check("name==a");
        assert!(!context.is_syntax_error);
        assert!(context.suggestions.is_empty());
    }

    #[test]
    fn test_dangling_connector_offers_fields() {
        let context = oracle_check("name==a and ");
        assert!(context.is_syntax_error);
        assert!(texts(&context).contains(&"controllerid"));
        assert!(context.suggestions.iter().all(|s| s.begin == 12));
    }

    #[test]
    fn test_unknown_token_offers_all_fields() {
        let context = oracle_check("nam");
        assert!(context.is_syntax_error);
        let name = context
            .suggestions
            .iter()
            .find(|s| s.suggestion == "name")
            .expect("name should be suggested");
        assert_eq!((name.begin, name.end), (0, 4));
        assert_eq!(name.context.as_deref(), Some("nam"));
        assert!(context
            .error_message
            .as_deref()
            .unwrap()
            .contains("Was expecting: id,name,"));
    }

    #[test]
    fn test_relation_field_offers_dot() {
        let context = oracle_check("assignedds");
        assert_eq!(texts(&context), vec!["."]);
        assert_eq!(context.suggestions[0].begin, 10);
    }

    #[test]
    fn test_single_sub_attribute_field_offers_dot_and_comparators() {
        let context = oracle_check("tag");
        let texts = texts(&context);
        assert_eq!(texts[0], ".");
        assert!(texts.contains(&"=="));
    }

    #[test]
    fn test_partial_sub_attribute_offers_sub_attributes() {
        let context = oracle_check("assignedds.na");
        assert_eq!(texts(&context), vec!["id", "name", "version"]);
        assert!(context.suggestions.iter().all(|s| s.begin == 11));
        assert_eq!(context.suggestions[0].context.as_deref(), Some("na"));
    }

    #[test]
    fn test_known_field_offers_comparators() {
        let context = oracle_check("assignedds.name");
        let texts = texts(&context);
        assert_eq!(texts.len(), Operator::ALL.len());
        assert_eq!(texts[0], "==");
        assert!(context.suggestions.iter().all(|s| s.begin == 15));
    }

    #[test]
    fn test_partial_keyword_offers_connectors() {
        let context = oracle_check("name==a an");
        assert_eq!(texts(&context), vec!["and", "or"]);
        assert_eq!(context.suggestions[0].begin, 8);
        assert_eq!(context.suggestions[0].context.as_deref(), Some("an"));
    }

    #[test]
    fn test_semantic_error_has_message_only() {
        let context = oracle_check("updatestatus==bogus");
        assert!(context.is_syntax_error);
        assert!(context.suggestions.is_empty());
        assert!(context.error_message.unwrap().contains("must be one of"));
    }

    #[test]
    fn test_cursor_limits_the_checked_text() {
        let registry = SchemaRegistry::fleet().unwrap();
        let schema = registry.resolve("target").unwrap();
        let oracle = SuggestionOracle::new(&schema);
        let context = oracle.suggest("nam==x", 3);
        assert!(context.is_syntax_error);
        assert!(texts(&context).contains(&"name"));

        // offsets past the end or inside a multi-byte char are clamped
        let context = oracle.suggest("name==\u{e9}", 7);
        assert!(context.is_syntax_error);
        let context = oracle.suggest("name==a ", 100);
        assert!(!context.is_syntax_error);
    }
}
