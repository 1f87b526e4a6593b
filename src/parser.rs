//! RSQL text to expression tree.
//!
//! Parsing either yields a [`Node`] or a [`ParseFailure`] describing where
//! the input stopped making sense and which token kinds would have been
//! accepted there. The suggestion oracle works from that failure value, so
//! it is a plain typed struct rather than a formatted message.

use crate::ast::{Comparison, Node, Operator};
use crate::error::QueryError;
use pest::error::{ErrorVariant, InputLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::Serialize;
use std::fmt;

#[derive(Parser)]
#[grammar = "rsql.pest"]
struct RsqlGrammar;

/// Kinds of tokens the parser can expect at a failure position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Selector,
    Comparator,
    Argument,
    LogicalOperator,
    OpenParen,
    CloseParen,
    EndOfInput,
}

impl TokenKind {
    fn describe(self) -> &'static str {
        match self {
            TokenKind::Selector => "<field>",
            TokenKind::Comparator => "<comparator>",
            TokenKind::Argument => "<value>",
            TokenKind::LogicalOperator => "<and/or>",
            TokenKind::OpenParen => "\"(\"",
            TokenKind::CloseParen => "\")\"",
            TokenKind::EndOfInput => "<end of input>",
        }
    }
}

/// A run of unreserved characters in the input, with byte offsets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Structured parse failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    /// Byte offset at which parsing failed.
    pub offset: usize,
    /// Text found at the failure offset, `None` at end of input.
    pub found: Option<String>,
    /// Last unreserved token before the failure offset, if any.
    pub previous: Option<TokenSpan>,
    /// Token kinds that would have been accepted at `offset`.
    pub expected: Vec<TokenKind>,
}

impl ParseFailure {
    fn at(input: &str, offset: usize, mut expected: Vec<TokenKind>) -> Self {
        expected.sort_unstable();
        expected.dedup();
        Self {
            offset,
            found: fragment_at(input, offset),
            previous: token_before(input, offset),
            expected,
        }
    }

    pub fn expects(&self, kind: TokenKind) -> bool {
        self.expected.contains(&kind)
    }

    /// First sentence of the message, without the expected token kinds.
    pub fn position_message(&self) -> String {
        match &self.found {
            Some(found) => format!("Encountered \"{}\" at position {}.", found, self.offset),
            None => format!("Encountered end of input at position {}.", self.offset),
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.position_message())?;
        if !self.expected.is_empty() {
            let kinds: Vec<_> = self.expected.iter().map(|k| k.describe()).collect();
            write!(f, " Was expecting: {}", kinds.join(", "))?;
        }
        Ok(())
    }
}

impl From<ParseFailure> for QueryError {
    fn from(failure: ParseFailure) -> Self {
        QueryError::syntax(failure.to_string())
    }
}

pub(crate) fn is_reserved(c: char) -> bool {
    c.is_whitespace() || "\"'();,=!~<>".contains(c)
}

fn fragment_at(input: &str, offset: usize) -> Option<String> {
    let rest = input.get(offset..)?;
    let fragment: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    if fragment.is_empty() {
        None
    } else {
        Some(fragment)
    }
}

fn token_before(input: &str, offset: usize) -> Option<TokenSpan> {
    let head = input.get(..offset)?;
    let end = head.trim_end().len();
    let start = head[..end]
        .char_indices()
        .rev()
        .take_while(|(_, c)| !is_reserved(*c))
        .last()
        .map(|(i, _)| i)?;
    Some(TokenSpan {
        text: head[start..end].to_string(),
        start,
        end,
    })
}

fn token_kinds(rule: Rule) -> &'static [TokenKind] {
    match rule {
        Rule::selector | Rule::comparison => &[TokenKind::Selector],
        Rule::and_expr | Rule::or_expr | Rule::query => &[TokenKind::Selector, TokenKind::OpenParen],
        Rule::comparator => &[TokenKind::Comparator],
        Rule::argument | Rule::arguments => &[TokenKind::Argument],
        Rule::and_op | Rule::or_op => &[TokenKind::LogicalOperator],
        Rule::open_paren | Rule::group => &[TokenKind::OpenParen],
        Rule::close_paren => &[TokenKind::CloseParen],
        Rule::EOI => &[TokenKind::EndOfInput],
        _ => &[],
    }
}

/// Parse RSQL text into an expression tree.
pub fn parse(input: &str) -> Result<Node, ParseFailure> {
    let mut pairs = match RsqlGrammar::parse(Rule::query, input) {
        Ok(pairs) => pairs,
        Err(err) => {
            let offset = match err.location {
                InputLocation::Pos(pos) => pos,
                InputLocation::Span((start, _)) => start,
            };
            let expected = match &err.variant {
                ErrorVariant::ParsingError { positives, .. } => positives
                    .iter()
                    .flat_map(|rule| token_kinds(*rule).iter().copied())
                    .collect(),
                ErrorVariant::CustomError { .. } => Vec::new(),
            };
            let failure = ParseFailure::at(input, offset, expected);
            tracing::debug!(query = input, %failure, "rsql parse failed");
            return Err(failure);
        }
    };

    let query = pairs.next().ok_or_else(|| ParseFailure::at(input, 0, vec![TokenKind::Selector]))?;
    let or_expr = query
        .into_inner()
        .find(|p| p.as_rule() == Rule::or_expr)
        .ok_or_else(|| ParseFailure::at(input, 0, vec![TokenKind::Selector]))?;
    let node = build_or(input, or_expr)?;
    tracing::debug!(query = input, tree = %node, "rsql parsed");
    Ok(node)
}

fn build_or(input: &str, pair: Pair<'_, Rule>) -> Result<Node, ParseFailure> {
    let mut children = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::and_expr)
        .map(|p| build_and(input, p))
        .collect::<Result<Vec<_>, _>>()?;
    if children.len() == 1 {
        Ok(children.remove(0))
    } else {
        Ok(Node::Or(children))
    }
}

fn build_and(input: &str, pair: Pair<'_, Rule>) -> Result<Node, ParseFailure> {
    let mut children = Vec::new();
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::comparison => children.push(build_comparison(input, child)?),
            Rule::group => {
                if let Some(inner) = child.into_inner().find(|p| p.as_rule() == Rule::or_expr) {
                    children.push(build_or(input, inner)?);
                }
            }
            _ => {}
        }
    }
    if children.len() == 1 {
        Ok(children.remove(0))
    } else {
        Ok(Node::And(children))
    }
}

fn build_comparison(input: &str, pair: Pair<'_, Rule>) -> Result<Node, ParseFailure> {
    let start = pair.as_span().start();
    let mut selector = "";
    let mut operator = None;
    let mut arguments = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::selector => selector = part.as_str(),
            Rule::comparator => {
                let symbol = part.as_str();
                operator = Operator::from_symbol(symbol);
                if operator.is_none() {
                    return Err(ParseFailure::at(
                        input,
                        part.as_span().start(),
                        vec![TokenKind::Comparator],
                    ));
                }
            }
            Rule::arguments => {
                arguments.extend(
                    part.into_inner()
                        .filter(|p| p.as_rule() == Rule::argument)
                        .map(|p| unquote(p.as_str())),
                );
            }
            _ => {}
        }
    }
    let operator = operator.ok_or_else(|| ParseFailure::at(input, start + selector.len(), vec![TokenKind::Comparator]))?;
    Ok(Node::Comparison(Comparison::new(selector, operator, arguments)))
}

/// Strip quotes from a quoted argument. Only escaped quotes and escaped
/// backslashes are unescaped, so `\*` survives for wildcard handling.
fn unquote(raw: &str) -> String {
    let quote = match raw.chars().next() {
        Some(q @ ('"' | '\'')) if raw.len() >= 2 && raw.ends_with(q) => q,
        _ => return raw.to_string(),
    };
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == quote || next == '\\' => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(selector: &str, op: Operator, args: &[&str]) -> Node {
        Node::Comparison(Comparison::new(
            selector,
            op,
            args.iter().map(|s| s.to_string()).collect(),
        ))
    }

    #[test]
    fn test_single_comparison() {
        assert_eq!(parse("name==abc").unwrap(), cmp("name", Operator::Equal, &["abc"]));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let tree = parse("a==1;b==2,c==3").unwrap();
        assert_eq!(
            tree,
            Node::Or(vec![
                Node::And(vec![
                    cmp("a", Operator::Equal, &["1"]),
                    cmp("b", Operator::Equal, &["2"]),
                ]),
                cmp("c", Operator::Equal, &["3"]),
            ])
        );
    }

    #[test]
    fn test_keyword_connectors_and_groups() {
        let tree = parse("a==1 and (b==2 or c==3)").unwrap();
        assert_eq!(
            tree,
            Node::And(vec![
                cmp("a", Operator::Equal, &["1"]),
                Node::Or(vec![
                    cmp("b", Operator::Equal, &["2"]),
                    cmp("c", Operator::Equal, &["3"]),
                ]),
            ])
        );
    }

    #[test]
    fn test_list_arguments() {
        assert_eq!(
            parse("status=in=(pending, finished)").unwrap(),
            cmp("status", Operator::In, &["pending", "finished"])
        );
    }

    #[test]
    fn test_quoted_argument_keeps_wildcard_escape() {
        assert_eq!(
            parse(r#"name=="a \"b\" \*c""#).unwrap(),
            cmp("name", Operator::Equal, &[r#"a "b" \*c"#])
        );
        assert_eq!(parse("name=='x y'").unwrap(), cmp("name", Operator::Equal, &["x y"]));
    }

    #[test]
    fn test_macro_argument_is_unreserved() {
        assert_eq!(
            parse("lastcontrollerrequestat=le=${overdue_ts}").unwrap(),
            cmp("lastcontrollerrequestat", Operator::LessOrEqual, &["${overdue_ts}"])
        );
    }

    #[test]
    fn test_missing_comparator_reports_previous_token() {
        let failure = parse("nam").unwrap_err();
        assert_eq!(failure.offset, 3);
        assert!(failure.expects(TokenKind::Comparator));
        let previous = failure.previous.unwrap();
        assert_eq!(previous.text, "nam");
        assert_eq!((previous.start, previous.end), (0, 3));
        assert_eq!(failure.found, None);
    }

    #[test]
    fn test_missing_value() {
        let failure = parse("name==").unwrap_err();
        assert_eq!(failure.offset, 6);
        assert_eq!(failure.expected, vec![TokenKind::Argument]);
    }

    #[test]
    fn test_dangling_connector_expects_selector() {
        let failure = parse("name==a and ").unwrap_err();
        assert_eq!(failure.offset, 12);
        assert!(failure.expects(TokenKind::Selector));
    }

    #[test]
    fn test_incomplete_keyword_expects_logical_operator() {
        let failure = parse("name==a an").unwrap_err();
        assert_eq!(failure.offset, 8);
        assert_eq!(failure.found.as_deref(), Some("an"));
        assert!(failure.expects(TokenKind::LogicalOperator));
    }

    #[test]
    fn test_unknown_operator_is_a_parse_failure() {
        let failure = parse("name=like=abc").unwrap_err();
        assert_eq!(failure.offset, 4);
        assert_eq!(failure.expected, vec![TokenKind::Comparator]);
        let err: QueryError = failure.into();
        assert!(err.to_string().contains("=like=abc"));
    }

    #[test]
    fn test_unknown_operator_offset_in_later_comparison() {
        let failure = parse("name==a;desc=like=x").unwrap_err();
        assert_eq!(failure.offset, 12);
        assert_eq!(failure.expected, vec![TokenKind::Comparator]);
    }

    #[test]
    fn test_empty_query_fails() {
        let failure = parse("").unwrap_err();
        assert_eq!(failure.offset, 0);
        assert!(failure.expects(TokenKind::Selector));
    }
}
