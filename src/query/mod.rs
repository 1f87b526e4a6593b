//! Query module for resolving, compiling, validating and matching filters.
//!
//! This module provides the core of fleetql:
//!
//! - Selector resolution against an entity schema (`QueryPath`)
//! - Compilation of expression trees into predicate trees
//! - Validation of selectors without compilation
//! - In-memory matching through a `FieldDataProvider`
//!
//! # Compile Options
//!
//! Case folding and macro handling are configured through `QueryOptions`.

// Module declarations
mod compiler;
mod matcher;
mod options;
mod path;
mod validate;
mod value;

// Options
pub use options::QueryOptions;

// Path resolution
pub use path::{resolve, QueryPath};

// Tree consumers
pub use compiler::compile;
pub use matcher::{matches, FieldDataProvider, JsonRecordProvider};
pub use validate::{validate, ValidationVisitor};
