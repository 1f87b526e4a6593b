//! Expression tree for RSQL filters.
//!
//! The parser produces a [`Node`] tree made of AND/OR groups and
//! comparisons. Every consumer of the tree (compiler, validator, matcher)
//! implements [`Visitor`] and is driven through [`Node::accept`].

use serde::Serialize;
use std::fmt;

/// Comparison operators understood by the filter language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    In,
    Out,
    Is,
    Not,
}

impl Operator {
    /// All operators in the order they are offered as completions.
    pub const ALL: [Operator; 10] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterOrEqual,
        Operator::LessOrEqual,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::In,
        Operator::Out,
        Operator::Is,
        Operator::Not,
    ];

    /// Canonical symbol of the operator.
    pub const fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => "=gt=",
            Operator::GreaterOrEqual => "=ge=",
            Operator::LessThan => "=lt=",
            Operator::LessOrEqual => "=le=",
            Operator::In => "=in=",
            Operator::Out => "=out=",
            Operator::Is => "=is=",
            Operator::Not => "=not=",
        }
    }

    /// Parse an operator symbol. `=eq=` and `=ne=` are accepted as aliases
    /// of `=is=` and `=not=`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_ascii_lowercase().as_str() {
            "==" => Some(Operator::Equal),
            "!=" => Some(Operator::NotEqual),
            "=gt=" => Some(Operator::GreaterThan),
            "=ge=" => Some(Operator::GreaterOrEqual),
            "=lt=" => Some(Operator::LessThan),
            "=le=" => Some(Operator::LessOrEqual),
            "=in=" => Some(Operator::In),
            "=out=" => Some(Operator::Out),
            "=is=" | "=eq=" => Some(Operator::Is),
            "=not=" | "=ne=" => Some(Operator::Not),
            _ => None,
        }
    }

    /// `=in=` and `=out=` take a list, everything else exactly one value.
    pub const fn is_multi_value(self) -> bool {
        matches!(self, Operator::In | Operator::Out)
    }

    /// Operators whose result is the complement of a positive condition.
    pub const fn is_negated(self) -> bool {
        matches!(self, Operator::NotEqual | Operator::Not | Operator::Out)
    }

    pub const fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::GreaterOrEqual
                | Operator::LessThan
                | Operator::LessOrEqual
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single `selector operator arguments` clause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub selector: String,
    pub operator: Operator,
    pub arguments: Vec<String>,
}

impl Comparison {
    pub fn new(selector: impl Into<String>, operator: Operator, arguments: Vec<String>) -> Self {
        Self {
            selector: selector.into(),
            operator,
            arguments,
        }
    }
}

/// Parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Comparison(Comparison),
}

impl Node {
    /// Dispatch to the visitor method matching this node.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            Node::And(children) => visitor.visit_and(children),
            Node::Or(children) => visitor.visit_or(children),
            Node::Comparison(comparison) => visitor.visit_comparison(comparison),
        }
    }

    /// Every comparison in the tree, depth first.
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a Comparison>) {
        match self {
            Node::And(children) | Node::Or(children) => {
                for child in children {
                    child.collect_comparisons(out);
                }
            }
            Node::Comparison(comparison) => out.push(comparison),
        }
    }
}

/// One method per node kind. Implemented independently by each consumer of
/// the tree.
pub trait Visitor {
    type Output;

    fn visit_and(&mut self, children: &[Node]) -> Self::Output;
    fn visit_or(&mut self, children: &[Node]) -> Self::Output;
    fn visit_comparison(&mut self, comparison: &Comparison) -> Self::Output;
}

fn write_argument(f: &mut fmt::Formatter<'_>, arg: &str) -> fmt::Result {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| !c.is_whitespace() && !"\"'();,=!~<>".contains(c));
    if plain {
        f.write_str(arg)
    } else {
        write!(f, "\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.selector, self.operator)?;
        if self.arguments.len() == 1 && !self.operator.is_multi_value() {
            write_argument(f, &self.arguments[0])
        } else {
            f.write_str("(")?;
            for (i, arg) in self.arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write_argument(f, arg)?;
            }
            f.write_str(")")
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Comparison(c) => write!(f, "{}", c),
            Node::And(children) | Node::Or(children) => {
                let sep = if matches!(self, Node::And(_)) { ";" } else { "," };
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{}", child)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_aliases() {
        assert_eq!(Operator::from_symbol("=eq="), Some(Operator::Is));
        assert_eq!(Operator::from_symbol("=NE="), Some(Operator::Not));
        assert_eq!(Operator::from_symbol("=like="), None);
    }

    #[test]
    fn test_symbols_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_symbol(op.symbol()), Some(op));
        }
    }

    #[test]
    fn test_display_quotes_reserved_arguments() {
        let node = Node::And(vec![
            Node::Comparison(Comparison::new("name", Operator::Equal, vec!["a b".into()])),
            Node::Comparison(Comparison::new(
                "tag",
                Operator::In,
                vec!["x".into(), "y".into()],
            )),
        ]);
        assert_eq!(node.to_string(), "(name==\"a b\";tag=in=(x,y))");
    }

    #[test]
    fn test_comparisons_are_collected_depth_first() {
        let node = Node::Or(vec![
            Node::Comparison(Comparison::new("a", Operator::Equal, vec!["1".into()])),
            Node::And(vec![Node::Comparison(Comparison::new(
                "b",
                Operator::Equal,
                vec!["2".into()],
            ))]),
        ]);
        let selectors: Vec<_> = node.comparisons().iter().map(|c| c.selector.as_str()).collect();
        assert_eq!(selectors, vec!["a", "b"]);
    }
}
