//! fleetql - RSQL filter queries for fleet management entities.
//!
//! This library turns textual RSQL filters such as
//! `name==abc;updatestatus==pending` into backend-agnostic predicates over a
//! strongly-typed entity schema. It supports semantic validation, join and
//! subquery planning for relational backends, macro expansion, in-memory
//! matching and editor completions on syntax errors.
//!
//! # Features
//!
//! - **Parsing**: RSQL grammar with typed parse failures
//! - **Schemas**: Closed field lists per entity type, checked at registration
//! - **Compilation**: Predicate trees with join reuse and `NOT EXISTS` negation
//! - **Macros**: `${NOW_TS}` and `${OVERDUE_TS}` with per-tenant caching
//! - **Matching**: Evaluate filters against in-memory records
//! - **Suggestions**: Completion candidates for partial queries
//!
//! # Quick Start
//!
//! ```no_run
//! use fleetql::{QueryEngine, SchemaRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = QueryEngine::new(SchemaRegistry::fleet()?);
//! let filter = engine.compile("target", "name==web*;tag==prod")?;
//! println!("{}", filter);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`ast`] - Expression tree and visitor trait
//! - [`parser`] - RSQL text to expression tree
//! - [`schema`] - Field schemas and the registry
//! - [`query`] - Path resolution, compilation, validation, matching
//! - [`predicate`] - Backend-agnostic predicate tree
//! - [`macros`] - Placeholder expansion
//! - [`tenant`] - Tenant polling configuration
//! - [`backend`] - SQLite lowering and execution
//! - [`suggest`] - Completion oracle
//! - [`error`] - Error types
//! - [`output`] - Response types and formatting

pub mod ast;
pub mod backend;
pub mod engine;
pub mod error;
pub mod macros;
pub mod output;
pub mod output_common;
pub mod parser;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod suggest;
pub mod tenant;

// Re-export the main entry points for external use
pub use ast::{Comparison, Node, Operator, Visitor};
pub use engine::QueryEngine;
pub use error::{QueryError, Result};
pub use parser::{parse, ParseFailure, TokenKind};
pub use predicate::{CompiledFilter, Predicate, Value};
pub use query::{FieldDataProvider, JsonRecordProvider, QueryOptions, QueryPath};
pub use schema::{EntitySchema, FilterField, SchemaRegistry};
pub use suggest::{SuggestionToken, ValidationContext};

use clap::ValueEnum;

/// What happens to `${NAME}` placeholders no macro lookup knows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UnknownMacroPolicy {
    /// Fail the query with a syntax error naming the placeholder (default)
    #[default]
    Reject,
    /// Leave the placeholder in the value unexpanded
    Keep,
}
