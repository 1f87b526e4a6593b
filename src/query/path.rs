//! Selector resolution against an entity schema.

use crate::error::{QueryError, Result};
use crate::schema::{EntitySchema, FilterField, ValueType};

/// A selector resolved to backend attribute names.
///
/// `segments` starts with the field's backend path, followed by the backend
/// name of a sub-attribute or by the raw key of a map entry.
#[derive(Clone, Debug)]
pub struct QueryPath<'s> {
    pub field: &'s FilterField,
    pub segments: Vec<String>,
}

impl PartialEq for QueryPath<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.field.name == other.field.name && self.segments == other.segments
    }
}

impl Eq for QueryPath<'_> {}

impl<'s> QueryPath<'s> {
    /// True when the path reads an attribute of the root entity itself.
    ///
    /// Map entries count as direct: the key narrows the joined entries to a
    /// single one, so negation does not need a subquery.
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1 || (self.field.is_map && self.segments.len() == 2)
    }

    /// Backend name of the relation or map collection, if the path crosses one.
    pub fn relation(&self) -> Option<&str> {
        if self.segments.len() > 1 {
            self.segments.first().map(String::as_str)
        } else {
            None
        }
    }

    /// Raw key of a map entry.
    pub fn map_key(&self) -> Option<&str> {
        if self.field.is_map {
            self.segments.get(1).map(String::as_str)
        } else {
            None
        }
    }

    /// Backend attribute the comparison reads.
    pub fn attribute(&self) -> &str {
        if let (true, Some((_, value))) = (self.field.is_map, &self.field.map_key_value) {
            return value;
        }
        self.segments.last().map(String::as_str).unwrap_or(self.field.backend_path.as_str())
    }

    /// Value type of the attribute the path ends on.
    pub fn value_type(&self) -> &'s ValueType {
        if self.field.is_map || self.segments.len() < 2 {
            &self.field.value_type
        } else {
            self.field.value_type_of(self.segments.last().map(String::as_str))
        }
    }
}

/// Resolve `selector` against `schema`.
pub fn resolve<'s>(selector: &str, schema: &'s EntitySchema) -> Result<QueryPath<'s>> {
    let (root, rest) = match selector.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (selector, None),
    };

    let field = schema.field(root).ok_or_else(|| {
        QueryError::unsupported(format!(
            "'{}' is not a valid field. Valid fields are: {}",
            selector,
            schema.field_names().join(", ")
        ))
    })?;

    let mut segments = vec![field.backend_path.clone()];

    if field.is_map {
        match rest {
            Some(key) if !key.is_empty() => segments.push(key.to_string()),
            _ => {
                return Err(QueryError::syntax(format!(
                    "The syntax of the map field '{}' is wrong. A map field must be used as '{}.<key>'",
                    selector,
                    field.name.to_ascii_lowercase()
                )))
            }
        }
    } else if field.has_sub_attributes() {
        let sub = match rest {
            Some(name) => field.sub_attribute(name).ok_or_else(|| {
                QueryError::unsupported(format!(
                    "'{}' is not a valid field. Sub-attributes of '{}' are: {}",
                    selector,
                    field.name,
                    sub_attribute_names(field)
                ))
            })?,
            None => match field.sub_attributes.as_slice() {
                [only] => only,
                _ => {
                    return Err(QueryError::unsupported(format!(
                        "'{}' needs a sub-attribute, one of: {}",
                        selector,
                        sub_attribute_names(field)
                    )))
                }
            },
        };
        segments.push(sub.backend.clone());
    } else if rest.is_some() {
        return Err(QueryError::unsupported(format!(
            "'{}' is not a valid field. '{}' has no sub-attributes",
            selector, field.name
        )));
    }

    Ok(QueryPath { field, segments })
}

fn sub_attribute_names(field: &FilterField) -> String {
    field
        .sub_attributes
        .iter()
        .map(|sub| format!("{}.{}", field.name, sub.name))
        .collect::<Vec<_>>()
        .join(", ")
}
