//! Macro expansion in comparison values.
//!
//! `${NAME}` placeholders are replaced before a value is converted.
//! `$${NAME}` is the escaped form and yields the literal text `${NAME}`.
//! Names are matched case-insensitively.

use crate::error::{QueryError, Result};
use crate::tenant::TenantIntervalCache;
use crate::UnknownMacroPolicy;
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

pub const NOW_TS: &str = "NOW_TS";
pub const OVERDUE_TS: &str = "OVERDUE_TS";

const PLACEHOLDER: &str = r"\$?\$\{([^}]*)\}";

/// Resolves macro names (upper case) to their current value.
pub trait MacroLookup: Send + Sync {
    /// `Ok(None)` when the name is not a known macro.
    fn lookup(&self, name: &str) -> Result<Option<String>>;
}

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

/// `NOW_TS` and `OVERDUE_TS` for one tenant.
pub struct TimeMacros {
    tenant: String,
    intervals: Arc<TenantIntervalCache>,
    clock: Clock,
}

impl TimeMacros {
    pub fn new(tenant: impl Into<String>, intervals: Arc<TenantIntervalCache>) -> Self {
        Self {
            tenant: tenant.into(),
            intervals,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl MacroLookup for TimeMacros {
    fn lookup(&self, name: &str) -> Result<Option<String>> {
        match name {
            NOW_TS => Ok(Some((self.clock)().to_string())),
            OVERDUE_TS => {
                let intervals = self.intervals.get(&self.tenant)?;
                let overdue = (self.clock)() - intervals.overdue_after().num_milliseconds();
                Ok(Some(overdue.to_string()))
            }
            _ => Ok(None),
        }
    }
}

/// Fixed name/value table, mostly useful in tests and for static deployments.
#[derive(Clone, Debug, Default)]
pub struct StaticMacros {
    values: HashMap<String, String>,
}

impl StaticMacros {
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_ascii_uppercase(), value.into());
        self
    }
}

impl MacroLookup for StaticMacros {
    fn lookup(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.get(name).cloned())
    }
}

/// Expands placeholders in raw argument text.
#[derive(Clone)]
pub struct MacroExpander {
    lookup: Arc<dyn MacroLookup>,
    policy: UnknownMacroPolicy,
    pattern: Regex,
}

impl MacroExpander {
    pub fn new(lookup: Arc<dyn MacroLookup>, policy: UnknownMacroPolicy) -> Result<Self> {
        let pattern = Regex::new(PLACEHOLDER).map_err(|e| QueryError::Internal {
            reason: format!("macro pattern: {}", e),
        })?;
        Ok(Self {
            lookup,
            policy,
            pattern,
        })
    }

    /// Replace every placeholder in `raw`.
    pub fn expand(&self, raw: &str) -> Result<String> {
        if !raw.contains("${") {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(raw) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&raw[last..whole.start()]);
            last = whole.end();

            if whole.as_str().starts_with("$$") {
                out.push_str(&whole.as_str()[1..]);
                continue;
            }
            match self.lookup.lookup(&name.as_str().to_ascii_uppercase())? {
                Some(value) => out.push_str(&value),
                None => match self.policy {
                    UnknownMacroPolicy::Reject => {
                        return Err(QueryError::syntax(format!(
                            "unknown macro '{}' in value '{}'",
                            whole.as_str(),
                            raw
                        )));
                    }
                    UnknownMacroPolicy::Keep => {
                        tracing::debug!(placeholder = whole.as_str(), "leaving unknown macro unexpanded");
                        out.push_str(whole.as_str());
                    }
                },
            }
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }
}

impl std::fmt::Debug for MacroExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroExpander").field("policy", &self.policy).finish()
    }
}
