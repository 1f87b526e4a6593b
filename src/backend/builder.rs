//! SQL generation for compiled filters.
//!
//! Every value becomes a bound parameter. Pattern leaves use
//! `LIKE ? ESCAPE '\'`, matching the escaping done by the compiler.

use super::mapping::{RelationKind, RelationTable, TableMapping};
use crate::error::{QueryError, Result};
use crate::predicate::{CompiledFilter, Join, JoinKind, Leaf, LeafOp, Predicate, Subquery, Value};
use rusqlite::types::Null;
use rusqlite::ToSql;

const OWNER_COLUMN: &str = "__owner";

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column(alias: &str, attribute: &str) -> String {
    format!("{}.{}", alias, quote(attribute))
}

/// Build `SELECT DISTINCT <id>` (or the count of distinct ids) for `filter`.
///
/// Rows are ordered by id so paging with `limit` is stable.
pub fn build_select(
    filter: &CompiledFilter,
    mapping: &TableMapping,
    count_only: bool,
    limit: Option<usize>,
) -> Result<(String, Vec<Box<dyn ToSql>>)> {
    let mut writer = SqlWriter {
        mapping,
        params: Vec::new(),
    };

    let id = column(&filter.root, &mapping.id_column);
    let mut sql = if count_only {
        format!("SELECT COUNT(DISTINCT {}) FROM {} {}", id, quote(&mapping.table), filter.root)
    } else {
        format!("SELECT DISTINCT {} FROM {} {}", id, quote(&mapping.table), filter.root)
    };
    for join in &filter.joins {
        sql.push(' ');
        sql.push_str(&writer.join(join)?);
    }
    let condition = writer.predicate(&filter.predicate)?;
    sql.push_str(" WHERE ");
    sql.push_str(&condition);

    if !count_only {
        sql.push_str(&format!(" ORDER BY {}", id));
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            writer.params.push(Box::new(limit as i64));
        }
    }

    tracing::debug!(entity = %filter.entity, sql = %sql, params = writer.params.len(), "lowered filter to SQL");
    Ok((sql, writer.params))
}

struct SqlWriter<'m> {
    mapping: &'m TableMapping,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlWriter<'_> {
    fn join(&mut self, join: &Join) -> Result<String> {
        let relation = self.mapping.relation_table(&join.relation)?;
        let keyword = match join.kind {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "JOIN",
        };
        let mut sql = format!("{} {} {} ON {}", keyword, source(relation), join.alias, self.join_condition(join, relation));
        if let Some(on) = &join.on {
            sql.push_str(" AND ");
            sql.push_str(&self.predicate(on)?);
        }
        Ok(sql)
    }

    fn join_condition(&self, join: &Join, relation: &RelationTable) -> String {
        match &relation.kind {
            RelationKind::ManyToOne { fk_column } => format!(
                "{} = {}",
                column(&join.alias, &relation.id_column),
                column(&join.parent, fk_column)
            ),
            RelationKind::OneToMany { owner_column } => format!(
                "{} = {}",
                column(&join.alias, owner_column),
                column(&join.parent, &self.mapping.id_column)
            ),
            RelationKind::ManyToMany { .. } => format!(
                "{} = {}",
                column(&join.alias, OWNER_COLUMN),
                column(&join.parent, &self.mapping.id_column)
            ),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::True => Ok("1 = 1".to_string()),
            Predicate::And(items) | Predicate::Or(items) => {
                let sep = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                let parts = items.iter().map(|item| self.predicate(item)).collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", parts.join(sep)))
            }
            Predicate::Not(inner) => Ok(format!("NOT {}", self.predicate(inner)?)),
            Predicate::Leaf(leaf) => self.leaf(leaf),
            Predicate::Exists(sub) => self.exists(sub),
        }
    }

    fn exists(&mut self, sub: &Subquery) -> Result<String> {
        let mut sql = format!("EXISTS (SELECT 1 FROM {} {}", quote(&self.mapping.table), sub.alias);
        for join in &sub.joins {
            sql.push(' ');
            sql.push_str(&self.join(join)?);
        }
        let condition = self.predicate(&sub.condition)?;
        sql.push_str(&format!(
            " WHERE {} = {} AND {})",
            column(&sub.alias, &sub.identifier),
            column(&sub.outer, &sub.identifier),
            condition
        ));
        Ok(sql)
    }

    fn leaf(&mut self, leaf: &Leaf) -> Result<String> {
        let target = column(&leaf.target.alias, &leaf.target.attribute);
        let target = if leaf.fold_case { format!("UPPER({})", target) } else { target };
        match leaf.op {
            LeafOp::IsNull | LeafOp::IsNotNull => Ok(format!("{} {}", target, leaf.op.sql())),
            LeafOp::Like | LeafOp::NotLike => {
                self.bind(&leaf.value)?;
                Ok(format!("{} {} ? ESCAPE '\\'", target, leaf.op.sql()))
            }
            LeafOp::In | LeafOp::NotIn => {
                let Value::List(items) = &leaf.value else {
                    return Err(QueryError::Internal {
                        reason: format!("{} needs a list value, got {}", leaf.op.sql(), leaf.value),
                    });
                };
                for item in items {
                    self.bind(item)?;
                }
                let placeholders = vec!["?"; items.len()].join(", ");
                Ok(format!("{} {} ({})", target, leaf.op.sql(), placeholders))
            }
            _ => {
                self.bind(&leaf.value)?;
                Ok(format!("{} {} ?", target, leaf.op.sql()))
            }
        }
    }

    fn bind(&mut self, value: &Value) -> Result<()> {
        let param: Box<dyn ToSql> = match value {
            Value::Null => Box::new(Null),
            Value::Text(s) => Box::new(s.clone()),
            Value::Bool(b) => Box::new(*b),
            Value::List(_) => {
                return Err(QueryError::Internal {
                    reason: "nested list value".to_string(),
                })
            }
        };
        self.params.push(param);
        Ok(())
    }
}

fn source(relation: &RelationTable) -> String {
    match &relation.kind {
        RelationKind::ManyToMany {
            link_table,
            owner_column,
            related_column,
        } => format!(
            "(SELECT l.{} AS {}, x.* FROM {} l JOIN {} x ON x.{} = l.{})",
            quote(owner_column),
            quote(OWNER_COLUMN),
            quote(link_table),
            quote(&relation.table),
            quote(&relation.id_column),
            quote(related_column)
        ),
        _ => quote(&relation.table),
    }
}
