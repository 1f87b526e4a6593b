//! Compile options.

use crate::UnknownMacroPolicy;

/// Options for compiling a filter.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Compare text case-insensitively.
    pub ignore_case: bool,
    /// The backend already compares text case-insensitively, so no folding
    /// needs to be emitted even when `ignore_case` is set.
    pub case_insensitive_db: bool,
    /// What to do with `${NAME}` placeholders nobody knows.
    pub unknown_macros: UnknownMacroPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            ignore_case: true,
            case_insensitive_db: false,
            unknown_macros: UnknownMacroPolicy::Reject,
        }
    }
}

impl QueryOptions {
    /// Whether the compiler has to upper-case both sides of text comparisons.
    pub fn fold_case(&self) -> bool {
        self.ignore_case && !self.case_insensitive_db
    }
}
