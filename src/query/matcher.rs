//! In-memory evaluation of expression trees.
//!
//! The matcher does not look at a schema: each comparison is handed to a
//! [`FieldDataProvider`] that knows how to read the record at hand. Use
//! [`crate::QueryEngine::matcher`] to check selectors against a schema first.

use super::value::{is_numeric, is_pattern, unescape_literal, wildcard_regex};
use super::QueryOptions;
use crate::ast::{Comparison, Node, Operator, Visitor};
use crate::macros::MacroExpander;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// Answers single comparisons against one record.
pub trait FieldDataProvider {
    fn matches(&self, selector: &str, operator: Operator, arguments: &[String]) -> bool;
}

struct Matcher<'p, P: ?Sized> {
    provider: &'p P,
}

impl<P: FieldDataProvider + ?Sized> Visitor for Matcher<'_, P> {
    type Output = bool;

    fn visit_and(&mut self, children: &[Node]) -> bool {
        children.iter().all(|child| child.accept(self))
    }

    fn visit_or(&mut self, children: &[Node]) -> bool {
        children.is_empty() || children.iter().any(|child| child.accept(self))
    }

    fn visit_comparison(&mut self, comparison: &Comparison) -> bool {
        self.provider
            .matches(&comparison.selector, comparison.operator, &comparison.arguments)
    }
}

/// Evaluate `tree` with `provider`. AND stops at the first false child, OR
/// at the first true one.
pub fn matches<P: FieldDataProvider + ?Sized>(tree: &Node, provider: &P) -> bool {
    tree.accept(&mut Matcher { provider })
}

/// Provider over a JSON object.
///
/// Selector segments are matched against property names case-insensitively
/// and walk into nested objects. Arrays are searched element-wise: positive
/// operators need one matching element, negated operators need none. A
/// property holding an object acts as a map and may be addressed with a key
/// containing dots, e.g. `attribute.hw.revision`.
///
/// Ordering operators follow the stored type: JSON numbers compare
/// numerically, everything else compares as text, so `"10"` sorts before
/// `"9"` the same way a text column does.
#[derive(Clone, Debug)]
pub struct JsonRecordProvider<'a> {
    record: &'a JsonValue,
    options: QueryOptions,
    expander: Option<&'a MacroExpander>,
}

impl<'a> JsonRecordProvider<'a> {
    pub fn new(record: &'a JsonValue) -> Self {
        Self {
            record,
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

    fn values(&self, selector: &str) -> Vec<Option<Scalar>> {
        let segments: Vec<&str> = selector.split('.').collect();
        let mut found = Vec::new();
        collect(self.record, &segments, &mut found);
        found.into_iter().map(Scalar::from_json).collect()
    }

    fn text_matches(&self, candidate: Option<&str>, argument: &str) -> bool {
        if argument.is_empty() {
            return candidate.map_or(true, str::is_empty);
        }
        let Some(candidate) = candidate else {
            return false;
        };
        if is_numeric(argument) {
            return candidate == argument;
        }
        if is_pattern(argument) {
            return wildcard_regex(argument, self.options.ignore_case).is_some_and(|re| re.is_match(candidate));
        }
        let literal = unescape_literal(argument);
        if self.options.ignore_case {
            candidate.eq_ignore_ascii_case(&literal)
        } else {
            candidate == literal
        }
    }

    fn member(&self, candidate: Option<&str>, arguments: &[&str]) -> bool {
        candidate.is_some_and(|c| {
            arguments.iter().any(|arg| {
                if self.options.ignore_case {
                    c.eq_ignore_ascii_case(arg)
                } else {
                    c == *arg
                }
            })
        })
    }
}

impl FieldDataProvider for JsonRecordProvider<'_> {
    fn matches(&self, selector: &str, operator: Operator, arguments: &[String]) -> bool {
        let Some(raw) = arguments.first() else {
            return false;
        };
        let first = match self.expander {
            Some(expander) => match expander.expand(raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(selector, error = %err, "macro expansion failed, comparison is false");
                    return false;
                }
            },
            None => raw.clone(),
        };
        let scalars = self.values(selector);
        let values: Vec<Option<&str>> = scalars.iter().map(|v| v.as_ref().map(|s| s.text.as_str())).collect();
        let is_null_literal = first.eq_ignore_ascii_case("null");

        match operator {
            Operator::Is if is_null_literal => values.iter().all(Option::is_none),
            Operator::Not if is_null_literal => values.iter().any(Option::is_some),
            Operator::Equal | Operator::Is => values.iter().any(|v| self.text_matches(*v, &first)),
            Operator::NotEqual | Operator::Not if first.is_empty() => values.iter().flatten().any(|v| !v.is_empty()),
            Operator::NotEqual | Operator::Not => !values.iter().any(|v| self.text_matches(*v, &first)),
            Operator::In | Operator::Out => {
                let list: Vec<&str> = std::iter::once(first.as_str())
                    .chain(arguments.iter().skip(1).map(String::as_str))
                    .collect();
                let found = values.iter().any(|v| self.member(*v, &list));
                found == (operator == Operator::In)
            }
            Operator::GreaterThan | Operator::GreaterOrEqual | Operator::LessThan | Operator::LessOrEqual => scalars
                .iter()
                .flatten()
                .any(|v| ordering_holds(operator, v.compare(&first))),
        }
    }
}

fn collect<'v>(value: &'v JsonValue, segments: &[&str], out: &mut Vec<&'v JsonValue>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        _ if segments.is_empty() => out.push(value),
        JsonValue::Object(map) => {
            let remainder = segments.join(".");
            if segments.len() > 1 {
                if let Some(entry) = map.get(&remainder) {
                    collect(entry, &[], out);
                    return;
                }
            }
            if let Some((_, entry)) = map.iter().find(|(k, _)| k.eq_ignore_ascii_case(segments[0])) {
                collect(entry, &segments[1..], out);
            }
        }
        _ => {}
    }
}

/// Scalar read from a record. `number` is set only for JSON numbers.
struct Scalar {
    text: String,
    number: Option<f64>,
}

impl Scalar {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self {
                text: s.clone(),
                number: None,
            }),
            JsonValue::Number(n) => Some(Self {
                text: n.to_string(),
                number: n.as_f64(),
            }),
            JsonValue::Bool(b) => Some(Self {
                text: b.to_string(),
                number: None,
            }),
            _ => None,
        }
    }

    fn compare(&self, argument: &str) -> Ordering {
        match (self.number, argument.parse::<f64>()) {
            (Some(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.text.as_str().cmp(argument),
        }
    }
}

fn ordering_holds(operator: Operator, ordering: Ordering) -> bool {
    match operator {
        Operator::GreaterThan => ordering == Ordering::Greater,
        Operator::GreaterOrEqual => ordering != Ordering::Less,
        Operator::LessThan => ordering == Ordering::Less,
        Operator::LessOrEqual => ordering != Ordering::Greater,
        _ => false,
    }
}
