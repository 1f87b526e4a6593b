//! Backend-agnostic predicate tree.
//!
//! The compiler lowers an RSQL expression into a [`CompiledFilter`]: the
//! relation joins it needs plus a boolean [`Predicate`] over aliased
//! attributes. Relational adapters turn this into native queries; the
//! `Display` impls render a readable SQL-like form used in diagnostics.

use serde::Serialize;
use std::fmt;

/// Typed comparison value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Attribute of an aliased entity, e.g. `t1.name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AttributeRef {
    pub alias: String,
    pub attribute: String,
}

impl AttributeRef {
    pub fn new(alias: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.attribute)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Pattern match with `%` wildcards and `\` as escape character.
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl LeafOp {
    pub const fn sql(self) -> &'static str {
        match self {
            LeafOp::Eq => "=",
            LeafOp::Ne => "<>",
            LeafOp::Gt => ">",
            LeafOp::Ge => ">=",
            LeafOp::Lt => "<",
            LeafOp::Le => "<=",
            LeafOp::Like => "LIKE",
            LeafOp::NotLike => "NOT LIKE",
            LeafOp::In => "IN",
            LeafOp::NotIn => "NOT IN",
            LeafOp::IsNull => "IS NULL",
            LeafOp::IsNotNull => "IS NOT NULL",
        }
    }

    pub const fn is_unary(self) -> bool {
        matches!(self, LeafOp::IsNull | LeafOp::IsNotNull)
    }
}

/// A single attribute condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Leaf {
    pub target: AttributeRef,
    pub op: LeafOp,
    pub value: Value,
    /// Compare the upper-cased attribute. The value is already upper-cased.
    pub fold_case: bool,
}

impl Leaf {
    pub fn new(target: AttributeRef, op: LeafOp, value: Value) -> Self {
        Self {
            target,
            op,
            value,
            fold_case: false,
        }
    }

    pub fn folded(mut self, fold_case: bool) -> Self {
        self.fold_case = fold_case;
        self
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fold_case {
            write!(f, "UPPER({})", self.target)?;
        } else {
            write!(f, "{}", self.target)?;
        }
        if self.op.is_unary() {
            write!(f, " {}", self.op.sql())
        } else {
            write!(f, " {} {}", self.op.sql(), self.value)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Left,
    Inner,
}

/// Relation join from a parent alias to a related entity or map entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Join {
    pub alias: String,
    pub parent: String,
    /// Relation attribute on the parent.
    pub relation: String,
    pub kind: JoinKind,
    /// Extra condition in the join's ON clause.
    pub on: Option<Predicate>,
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "JOIN",
        };
        write!(f, "{} {}.{} {}", kind, self.parent, self.relation, self.alias)?;
        if let Some(on) = &self.on {
            write!(f, " ON {}", on)?;
        }
        Ok(())
    }
}

/// Correlated subquery over the root entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Subquery {
    /// Alias of the subquery's own root.
    pub alias: String,
    /// Outer alias the subquery is correlated with.
    pub outer: String,
    /// Identity attribute used for correlation.
    pub identifier: String,
    pub joins: Vec<Join>,
    pub condition: Predicate,
}

impl fmt::Display for Subquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM root {}", self.alias, self.alias)?;
        for join in &self.joins {
            write!(f, " {}", join)?;
        }
        write!(
            f,
            " WHERE {}.{} = {}.{} AND {}",
            self.alias, self.identifier, self.outer, self.identifier, self.condition
        )
    }
}

/// Boolean predicate tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Leaf(Leaf),
    Exists(Box<Subquery>),
}

impl Predicate {
    /// Conjunction; no operands folds to `True`, one operand is returned as is.
    pub fn and(mut operands: Vec<Predicate>) -> Predicate {
        match operands.len() {
            0 => Predicate::True,
            1 => operands.remove(0),
            _ => Predicate::And(operands),
        }
    }

    /// Disjunction; no operands folds to `True` like an empty group.
    pub fn or(mut operands: Vec<Predicate>) -> Predicate {
        match operands.len() {
            0 => Predicate::True,
            1 => operands.remove(0),
            _ => Predicate::Or(operands),
        }
    }

    pub fn not_exists(subquery: Subquery) -> Predicate {
        Predicate::Not(Box::new(Predicate::Exists(Box::new(subquery))))
    }

    pub fn leaf(target: AttributeRef, op: LeafOp, value: Value) -> Predicate {
        Predicate::Leaf(Leaf::new(target, op, value))
    }

    pub fn is_null(target: AttributeRef) -> Predicate {
        Predicate::leaf(target, LeafOp::IsNull, Value::Null)
    }

    pub fn is_not_null(target: AttributeRef) -> Predicate {
        Predicate::leaf(target, LeafOp::IsNotNull, Value::Null)
    }

    /// All leaves of the tree, not descending into subqueries.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
            Predicate::Not(inner) => inner.collect_leaves(out),
            Predicate::Leaf(leaf) => out.push(leaf),
            Predicate::True | Predicate::Exists(_) => {}
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::And(items) | Predicate::Or(items) => {
                let sep = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
            Predicate::Leaf(leaf) => write!(f, "{}", leaf),
            Predicate::Exists(sub) => write!(f, "EXISTS ({})", sub),
        }
    }
}

/// Output of the compiler: joins to open from the root plus the predicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompiledFilter {
    pub entity: String,
    pub root: String,
    pub joins: Vec<Join>,
    pub predicate: Predicate,
}

impl fmt::Display for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FROM {} {}", self.entity, self.root)?;
        for join in &self.joins {
            write!(f, " {}", join)?;
        }
        write!(f, " WHERE {}", self.predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_groups_fold_to_true() {
        assert_eq!(Predicate::and(vec![]), Predicate::True);
        assert_eq!(Predicate::or(vec![]), Predicate::True);
    }

    #[test]
    fn test_single_operand_is_unwrapped() {
        let leaf = Predicate::is_null(AttributeRef::new("t0", "name"));
        assert_eq!(Predicate::and(vec![leaf.clone()]), leaf);
    }

    #[test]
    fn test_display() {
        let predicate = Predicate::Or(vec![
            Predicate::Leaf(
                Leaf::new(AttributeRef::new("t0", "name"), LeafOp::Like, Value::text("FOO%")).folded(true),
            ),
            Predicate::is_null(AttributeRef::new("t0", "name")),
        ]);
        assert_eq!(predicate.to_string(), "(UPPER(t0.name) LIKE 'FOO%' OR t0.name IS NULL)");
    }

    #[test]
    fn test_text_values_escape_quotes() {
        assert_eq!(Value::text("it's").to_string(), "'it''s'");
    }
}
