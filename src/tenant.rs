//! Tenant polling configuration used by the time macros.
//!
//! `${OVERDUE_TS}` depends on two per-tenant intervals. They are read
//! through [`TenantConfigSource`] and cached per tenant in
//! [`TenantIntervalCache`] until explicitly invalidated.

use crate::error::{QueryError, Result};
use chrono::{Duration, NaiveTime, Timelike};
use dashmap::DashMap;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const POLLING_TIME_KEY: &str = "pollingTime";
pub const POLLING_OVERDUE_KEY: &str = "pollingOverdueTime";
const DEFAULT_INTERVAL: &str = "00:05:00";

/// Parse an `HH:MM:SS` interval.
pub fn parse_interval(tenant: &str, raw: &str) -> Result<Duration> {
    let time = NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S").map_err(|e| QueryError::TenantConfig {
        tenant: tenant.to_string(),
        reason: format!("'{}' is not an HH:MM:SS interval: {}", raw, e),
    })?;
    Ok(Duration::seconds(i64::from(time.num_seconds_from_midnight())))
}

/// How often devices poll and how late a poll may be before it is overdue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingIntervals {
    pub polling_time: Duration,
    pub polling_overdue: Duration,
}

impl PollingIntervals {
    pub fn parse(tenant: &str, polling_time: &str, polling_overdue: &str) -> Result<Self> {
        Ok(Self {
            polling_time: parse_interval(tenant, polling_time)?,
            polling_overdue: parse_interval(tenant, polling_overdue)?,
        })
    }

    /// Combined span after which a device counts as overdue.
    pub fn overdue_after(&self) -> Duration {
        self.polling_time + self.polling_overdue
    }
}

impl Default for PollingIntervals {
    fn default() -> Self {
        Self {
            polling_time: Duration::minutes(5),
            polling_overdue: Duration::minutes(5),
        }
    }
}

/// Storage of per-tenant configuration. Reads may block.
pub trait TenantConfigSource: Send + Sync {
    fn polling_intervals(&self, tenant: &str) -> Result<PollingIntervals>;
}

/// In-process configuration: one default plus per-tenant overrides.
#[derive(Clone, Debug, Default)]
pub struct StaticTenantConfig {
    default: PollingIntervals,
    overrides: HashMap<String, PollingIntervals>,
}

impl StaticTenantConfig {
    pub fn new(default: PollingIntervals) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, intervals: PollingIntervals) -> Self {
        self.overrides.insert(tenant.into(), intervals);
        self
    }
}

impl TenantConfigSource for StaticTenantConfig {
    fn polling_intervals(&self, tenant: &str) -> Result<PollingIntervals> {
        Ok(self.overrides.get(tenant).copied().unwrap_or(self.default))
    }
}

/// Reads `tenant_configuration(tenant, conf_key, conf_value)` rows from a
/// SQLite database. Missing keys fall back to five minutes.
#[derive(Clone, Debug)]
pub struct SqliteTenantConfig {
    db_path: PathBuf,
}

impl SqliteTenantConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn read_key(conn: &Connection, tenant: &str, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row(
                "SELECT conf_value FROM tenant_configuration WHERE tenant = ?1 AND conf_key = ?2",
                params![tenant, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl TenantConfigSource for SqliteTenantConfig {
    fn polling_intervals(&self, tenant: &str) -> Result<PollingIntervals> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let polling = Self::read_key(&conn, tenant, POLLING_TIME_KEY)?;
        let overdue = Self::read_key(&conn, tenant, POLLING_OVERDUE_KEY)?;
        tracing::debug!(tenant, ?polling, ?overdue, "read tenant polling configuration");
        PollingIntervals::parse(
            tenant,
            polling.as_deref().unwrap_or(DEFAULT_INTERVAL),
            overdue.as_deref().unwrap_or(DEFAULT_INTERVAL),
        )
    }
}

/// Per-tenant cache in front of a [`TenantConfigSource`].
pub struct TenantIntervalCache {
    source: Arc<dyn TenantConfigSource>,
    entries: DashMap<String, PollingIntervals>,
}

impl TenantIntervalCache {
    pub fn new(source: Arc<dyn TenantConfigSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, tenant: &str) -> Result<PollingIntervals> {
        if let Some(hit) = self.entries.get(tenant) {
            return Ok(*hit);
        }
        let intervals = self.source.polling_intervals(tenant)?;
        self.entries.insert(tenant.to_string(), intervals);
        Ok(intervals)
    }

    /// Drop the cached entry of one tenant, e.g. after its configuration changed.
    pub fn invalidate(&self, tenant: &str) {
        self.entries.remove(tenant);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn cached_tenants(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for TenantIntervalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantIntervalCache")
            .field("cached_tenants", &self.entries.len())
            .finish()
    }
}
