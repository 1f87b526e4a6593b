//! Relational backend for compiled filters.
//!
//! The FilterBackend trait runs a [`CompiledFilter`] against a store and
//! returns the ids of the matching root entities. The SQLite implementation
//! lowers filters to SQL through a [`TableCatalog`].

mod builder;
mod mapping;
mod sqlite;

pub use builder::build_select;
pub use mapping::{RelationKind, RelationTable, TableCatalog, TableMapping, FLEET_DDL};
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::predicate::CompiledFilter;

/// Executes compiled filters.
pub trait FilterBackend {
    /// Ids of matching root entities, ordered by id.
    fn search(&self, filter: &CompiledFilter, limit: Option<usize>) -> Result<Vec<i64>>;

    /// Number of matching root entities.
    fn count(&self, filter: &CompiledFilter) -> Result<u64>;
}
