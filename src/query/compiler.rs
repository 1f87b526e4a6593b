//! Expression tree to predicate tree.
//!
//! The compiler walks the tree once. Relation joins are opened lazily while
//! comparisons are compiled and recorded in a [`JoinContext`] that lives for
//! exactly one compile call.
//!
//! Negating a condition on a to-many relation cannot be done on a joined
//! row: a target with tags `a` and `b` has a joined row whose tag is not `a`.
//! Negated operators on relation paths therefore become a correlated
//! `NOT EXISTS` over the root entity around the positive condition.

use super::path::{resolve, QueryPath};
use super::value::{convert, is_numeric, is_pattern, to_like_pattern, unescape_literal, Operand};
use super::QueryOptions;
use crate::ast::{Comparison, Node, Operator, Visitor};
use crate::error::{QueryError, Result};
use crate::macros::MacroExpander;
use crate::predicate::{AttributeRef, CompiledFilter, Join, JoinKind, Leaf, LeafOp, Predicate, Subquery, Value};
use crate::schema::{Cardinality, EntitySchema, ValueType};
use std::collections::HashMap;

const ROOT_ALIAS: &str = "t0";

#[derive(Debug, Default)]
struct JoinLevel {
    is_or: bool,
    joins: HashMap<String, String>,
}

/// Joins opened by one compile call, plus the nesting levels that decide
/// whether a join may be reused.
#[derive(Debug)]
pub(crate) struct JoinContext {
    next_alias: usize,
    levels: Vec<JoinLevel>,
    to_one: HashMap<String, String>,
    joins: Vec<Join>,
}

impl JoinContext {
    pub(crate) fn new() -> Self {
        Self {
            next_alias: 1,
            levels: Vec::new(),
            to_one: HashMap::new(),
            joins: Vec::new(),
        }
    }

    fn fresh_alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn push(&mut self, is_or: bool) {
        self.levels.push(JoinLevel {
            is_or,
            joins: HashMap::new(),
        });
    }

    fn pop(&mut self) {
        self.levels.pop();
    }

    fn open(&mut self, relation: &str, on: Option<Predicate>, alias: String) -> String {
        self.joins.push(Join {
            alias: alias.clone(),
            parent: ROOT_ALIAS.to_string(),
            relation: relation.to_string(),
            kind: JoinKind::Left,
            on,
        });
        alias
    }

    /// Alias of a join from the root to `relation`.
    ///
    /// To-one joins are shared by the whole filter. To-many joins are shared
    /// only by siblings of the same OR group; anywhere else every condition
    /// gets its own join.
    fn join(&mut self, relation: &str, cardinality: Cardinality) -> String {
        if cardinality == Cardinality::One {
            if let Some(alias) = self.to_one.get(relation) {
                return alias.clone();
            }
            let alias = self.fresh_alias();
            self.to_one.insert(relation.to_string(), alias.clone());
            return self.open(relation, None, alias);
        }

        if let Some(level) = self.levels.last() {
            if level.is_or {
                if let Some(alias) = level.joins.get(relation) {
                    return alias.clone();
                }
            }
        }
        let alias = self.fresh_alias();
        if let Some(level) = self.levels.last_mut() {
            if level.is_or {
                level.joins.insert(relation.to_string(), alias.clone());
            }
        }
        self.open(relation, None, alias)
    }

    /// Always a new join, with an extra ON condition over its own alias.
    fn join_on(&mut self, relation: &str, on: impl FnOnce(&str) -> Predicate) -> String {
        let alias = self.fresh_alias();
        let condition = on(&alias);
        self.open(relation, Some(condition), alias)
    }

    pub(crate) fn into_joins(self) -> Vec<Join> {
        self.joins
    }
}

/// Compile `tree` against `schema`.
pub fn compile(
    tree: &Node,
    schema: &EntitySchema,
    options: QueryOptions,
    expander: Option<&MacroExpander>,
) -> Result<CompiledFilter> {
    let mut compiler = PredicateCompiler {
        schema,
        options,
        expander,
        joins: JoinContext::new(),
    };
    let predicate = tree.accept(&mut compiler)?;
    let filter = CompiledFilter {
        entity: schema.entity.clone(),
        root: ROOT_ALIAS.to_string(),
        joins: compiler.joins.into_joins(),
        predicate,
    };
    tracing::debug!(entity = %schema.entity, %filter, "compiled filter");
    Ok(filter)
}

struct PredicateCompiler<'a> {
    schema: &'a EntitySchema,
    options: QueryOptions,
    expander: Option<&'a MacroExpander>,
    joins: JoinContext,
}

impl PredicateCompiler<'_> {
    fn check_arity(comparison: &Comparison) -> Result<()> {
        let count = comparison.arguments.len();
        if comparison.operator.is_multi_value() {
            if count == 0 {
                return Err(QueryError::syntax(format!(
                    "The operator '{}' of '{}' needs at least one value",
                    comparison.operator, comparison.selector
                )));
            }
        } else if count != 1 {
            return Err(QueryError::syntax(format!(
                "The operator '{}' of '{}' can only be used with one value",
                comparison.operator, comparison.selector
            )));
        }
        Ok(())
    }

    fn expand_first(&self, comparison: &Comparison) -> Result<String> {
        let first = comparison.arguments.first().map(String::as_str).unwrap_or_default();
        match self.expander {
            Some(expander) => expander.expand(first),
            None => Ok(first.to_string()),
        }
    }

    fn joined_target(&mut self, path: &QueryPath<'_>) -> AttributeRef {
        match path.relation() {
            Some(relation) => {
                let alias = self.joins.join(relation, path.field.cardinality);
                AttributeRef::new(alias, path.attribute())
            }
            None => AttributeRef::new(ROOT_ALIAS, path.attribute()),
        }
    }

    fn map_comparison(&mut self, path: &QueryPath<'_>, op: Operator, operands: &[Operand], raw: &str, fold: bool) -> Result<Predicate> {
        let (Some((key_attr, _)), Some(key), Some(relation)) = (&path.field.map_key_value, path.map_key(), path.relation()) else {
            return Err(QueryError::SchemaMisconfigured {
                entity: self.schema.entity.clone(),
                reason: format!("map field '{}' cannot be resolved to a key/value pair", path.field.name),
            });
        };
        let key_leaf = |alias: &str| Predicate::leaf(AttributeRef::new(alias, key_attr.as_str()), LeafOp::Eq, Value::text(key));

        if op == Operator::Is && operands.first() == Some(&Operand::Null) {
            let alias = self.joins.join_on(relation, key_leaf);
            return Ok(Predicate::is_null(AttributeRef::new(alias, path.attribute())));
        }

        let alias = self.joins.join(relation, Cardinality::Many);
        let value = AttributeRef::new(alias.as_str(), path.attribute());
        Ok(Predicate::and(vec![key_leaf(&alias), condition(value, op, operands, raw, fold)]))
    }

    fn not_exists(&mut self, path: &QueryPath<'_>, op: Operator, operands: &[Operand], raw: &str, fold: bool) -> Predicate {
        let positive = match op {
            Operator::Out => Operator::In,
            _ => Operator::Equal,
        };
        let sub_root = self.joins.fresh_alias();
        let alias = self.joins.fresh_alias();
        let join = Join {
            alias: alias.clone(),
            parent: sub_root.clone(),
            relation: path.relation().unwrap_or(path.field.backend_path.as_str()).to_string(),
            kind: JoinKind::Inner,
            on: None,
        };
        let condition = condition(AttributeRef::new(alias, path.attribute()), positive, operands, raw, fold);
        Predicate::not_exists(Subquery {
            alias: sub_root,
            outer: ROOT_ALIAS.to_string(),
            identifier: self.schema.identifier.clone(),
            joins: vec![join],
            condition,
        })
    }
}

impl Visitor for PredicateCompiler<'_> {
    type Output = Result<Predicate>;

    fn visit_and(&mut self, children: &[Node]) -> Result<Predicate> {
        self.joins.push(false);
        let compiled = children.iter().map(|child| child.accept(self)).collect::<Result<Vec<_>>>();
        self.joins.pop();
        Ok(Predicate::and(compiled?))
    }

    fn visit_or(&mut self, children: &[Node]) -> Result<Predicate> {
        self.joins.push(true);
        let compiled = children.iter().map(|child| child.accept(self)).collect::<Result<Vec<_>>>();
        self.joins.pop();
        Ok(Predicate::or(compiled?))
    }

    fn visit_comparison(&mut self, comparison: &Comparison) -> Result<Predicate> {
        let selector = comparison.selector.as_str();
        let op = comparison.operator;
        let path = resolve(selector, self.schema)?;
        Self::check_arity(comparison)?;

        let first = self.expand_first(comparison)?;
        let value_type = path.value_type();
        let raw_values = std::iter::once(first.as_str()).chain(comparison.arguments.iter().skip(1).map(String::as_str));
        let operands = raw_values
            .map(|raw| {
                if matches!(op, Operator::Is | Operator::Not) && raw.eq_ignore_ascii_case("null") {
                    Ok(Operand::Null)
                } else {
                    convert(selector, path.field, value_type, raw)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let fold = self.options.fold_case() && *value_type == ValueType::Text;

        if path.field.is_map {
            return self.map_comparison(&path, op, &operands, &first, fold);
        }

        let special = matches!(operands.first(), Some(Operand::Null)) || matches!(operands.first(), Some(Operand::Text(s)) if s.is_empty());
        let needs_subquery = !path.is_simple() && (op == Operator::Out || (op.is_negated() && !special));
        if needs_subquery {
            return Ok(self.not_exists(&path, op, &operands, &first, fold));
        }
        let target = self.joined_target(&path);
        Ok(condition(target, op, &operands, &first, fold))
    }
}

fn text_leaf(target: AttributeRef, op: LeafOp, text: &str, fold: bool) -> Predicate {
    let value = if fold { text.to_ascii_uppercase() } else { text.to_string() };
    Predicate::Leaf(Leaf::new(target, op, Value::Text(value)).folded(fold))
}

/// Condition on a single attribute, with the null handling of a directly
/// readable (possibly outer-joined) column.
fn condition(target: AttributeRef, op: Operator, operands: &[Operand], raw: &str, fold: bool) -> Predicate {
    let first = operands.first().cloned().unwrap_or(Operand::Null);
    match op {
        Operator::Equal | Operator::Is => equal(target, first, fold),
        Operator::NotEqual | Operator::Not => not_equal(target, first, fold),
        Operator::GreaterThan => Predicate::leaf(target, LeafOp::Gt, Value::text(raw)),
        Operator::GreaterOrEqual => Predicate::leaf(target, LeafOp::Ge, Value::text(raw)),
        Operator::LessThan => Predicate::leaf(target, LeafOp::Lt, Value::text(raw)),
        Operator::LessOrEqual => Predicate::leaf(target, LeafOp::Le, Value::text(raw)),
        Operator::In => membership(target, LeafOp::In, operands, fold),
        Operator::Out => Predicate::or(vec![
            Predicate::is_null(target.clone()),
            membership(target, LeafOp::NotIn, operands, fold),
        ]),
    }
}

fn membership(target: AttributeRef, op: LeafOp, operands: &[Operand], fold: bool) -> Predicate {
    let values = operands.iter().cloned().map(|operand| operand.into_value(fold)).collect();
    Predicate::Leaf(Leaf::new(target, op, Value::List(values)).folded(fold))
}

fn equal(target: AttributeRef, operand: Operand, fold: bool) -> Predicate {
    match operand {
        Operand::Null => Predicate::is_null(target),
        Operand::Typed(value) => Predicate::leaf(target, LeafOp::Eq, value),
        Operand::Text(s) if s.is_empty() => Predicate::or(vec![
            Predicate::is_null(target.clone()),
            Predicate::leaf(target, LeafOp::Eq, Value::text("")),
        ]),
        Operand::Text(s) if is_numeric(&s) => Predicate::leaf(target, LeafOp::Eq, Value::Text(s)),
        Operand::Text(s) if is_pattern(&s) => text_leaf(target, LeafOp::Like, &to_like_pattern(&s), fold),
        Operand::Text(s) => text_leaf(target, LeafOp::Eq, &unescape_literal(&s), fold),
    }
}

fn not_equal(target: AttributeRef, operand: Operand, fold: bool) -> Predicate {
    let or_null = |target: &AttributeRef, other: Predicate| Predicate::or(vec![Predicate::is_null(target.clone()), other]);
    match operand {
        Operand::Null => Predicate::is_not_null(target),
        Operand::Text(s) if s.is_empty() => Predicate::and(vec![
            Predicate::is_not_null(target.clone()),
            Predicate::leaf(target, LeafOp::Ne, Value::text("")),
        ]),
        Operand::Typed(value) => or_null(&target, Predicate::leaf(target.clone(), LeafOp::Ne, value)),
        Operand::Text(s) if is_numeric(&s) => or_null(&target, Predicate::leaf(target.clone(), LeafOp::Ne, Value::Text(s))),
        Operand::Text(s) if is_pattern(&s) => {
            or_null(&target, text_leaf(target.clone(), LeafOp::NotLike, &to_like_pattern(&s), fold))
        }
        Operand::Text(s) => or_null(&target, text_leaf(target.clone(), LeafOp::Ne, &unescape_literal(&s), fold)),
    }
}
