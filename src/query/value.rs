//! Argument conversion and wildcard handling.

use crate::error::{QueryError, Result};
use crate::predicate::Value;
use crate::schema::{FilterField, ValueType};
use regex::Regex;
use std::sync::OnceLock;

/// A converted argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Operand {
    /// The literal `null` of `=is=` / `=not=`.
    Null,
    /// Free text, subject to case folding and wildcard detection.
    Text(String),
    /// Enum constant, boolean or converter output. Compared as is.
    Typed(Value),
}

impl Operand {
    /// Value used inside `IN` lists.
    pub(crate) fn into_value(self, fold: bool) -> Value {
        match self {
            Operand::Null => Value::Null,
            Operand::Text(s) if fold && !is_numeric(&s) => Value::Text(s.to_ascii_uppercase()),
            Operand::Text(s) => Value::Text(s),
            Operand::Typed(v) => v,
        }
    }
}

/// Convert a raw argument for `field`.
///
/// Order: closed enumeration, custom converter, boolean, plain text.
pub(crate) fn convert(selector: &str, field: &FilterField, value_type: &ValueType, raw: &str) -> Result<Operand> {
    if let ValueType::Enumerated(values) = value_type {
        return values
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw))
            .map(|v| Operand::Typed(Value::Text(v.clone())))
            .ok_or_else(|| {
                tracing::info!(selector, value = raw, "value is not a constant of the enumerated field");
                let legal: Vec<_> = values.iter().map(|v| v.to_ascii_lowercase()).collect();
                QueryError::unsupported(format!(
                    "field '{}' must be one of the following values: {}",
                    selector,
                    legal.join(", ")
                ))
            });
    }

    if let Some(converter) = &field.converter {
        return converter.convert(raw).map(Operand::Typed).ok_or_else(|| {
            QueryError::unsupported(format!(
                "field '{}' must be one of the following values: {}",
                selector,
                converter.possible_values().join(", ")
            ))
        });
    }

    if *value_type == ValueType::Boolean {
        return if raw.eq_ignore_ascii_case("true") {
            Ok(Operand::Typed(Value::Bool(true)))
        } else if raw.eq_ignore_ascii_case("false") {
            Ok(Operand::Typed(Value::Bool(false)))
        } else {
            Err(QueryError::syntax(format!(
                "The value of field '{}' is not well formed. Only a boolean (true or false) value is expected",
                selector
            )))
        };
    }

    Ok(Operand::Text(raw.to_string()))
}

fn numeric_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").ok())
        .as_ref()
}

/// Numeric-looking text is never folded or treated as a pattern.
pub(crate) fn is_numeric(s: &str) -> bool {
    numeric_pattern().is_some_and(|re| re.is_match(s))
}

/// An unescaped `*` makes the argument a wildcard pattern.
pub(crate) fn is_pattern(s: &str) -> bool {
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' => return true,
            _ => {}
        }
    }
    false
}

/// Translate an RSQL wildcard argument into a `LIKE` pattern using `\` as
/// escape character.
pub(crate) fn to_like_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("\\*");
            }
            '\\' => out.push_str("\\\\"),
            '*' => out.push('%'),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            _ => out.push(c),
        }
    }
    out
}

/// Text a non-pattern argument compares against: `\*` is a literal `*`.
pub(crate) fn unescape_literal(s: &str) -> String {
    s.replace("\\*", "*")
}

/// Regex equivalent of an RSQL wildcard argument, anchored on both ends.
pub(crate) fn wildcard_regex(s: &str, ignore_case: bool) -> Option<Regex> {
    let mut expr = String::from("^");
    let mut literal = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                literal.push('*');
            }
            '*' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(".*");
            }
            _ => literal.push(c),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    regex::RegexBuilder::new(&expr)
        .case_insensitive(ignore_case)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_detection() {
        for s in ["1", "-3", "1.5", ".5", "1e10", "+2"] {
            assert!(is_numeric(s), "{}", s);
        }
        for s in ["", "1.1.1", "abc", "1*", "0x1f"] {
            assert!(!is_numeric(s), "{}", s);
        }
    }

    #[test]
    fn test_escaped_star_is_not_a_pattern() {
        assert!(is_pattern("*abc"));
        assert!(is_pattern("a\\*b*"));
        assert!(!is_pattern("\\*abc"));
        assert!(!is_pattern("abc"));
    }

    #[test]
    fn test_like_pattern_escapes_sql_wildcards() {
        assert_eq!(to_like_pattern("foo*"), "foo%");
        assert_eq!(to_like_pattern("50%_*"), "50\\%\\_%");
        assert_eq!(to_like_pattern("\\**"), "\\*%");
        assert_eq!(to_like_pattern("a\\b*"), "a\\\\b%");
    }

    #[test]
    fn test_unescape_literal() {
        assert_eq!(unescape_literal("\\*abc"), "*abc");
    }

    #[test]
    fn test_wildcard_regex() {
        let re = wildcard_regex("*abc", false).unwrap();
        assert!(re.is_match("xxabc"));
        assert!(!re.is_match("abcx"));
        let literal = wildcard_regex("\\*a.c*", true).unwrap();
        assert!(literal.is_match("*A.Cdef"));
        assert!(!literal.is_match("xa.c"));
        assert!(!literal.is_match("*abc"));
    }
}
