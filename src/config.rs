//! Limiter configuration.
//!
//! Supplied once at process start and immutable afterwards. Durations are
//! expressed in whole seconds in the serialized form so the same document can
//! be shared with non-Rust deployments.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::{PolicyTable, RoutePolicy};

/// Environment variable that forces the kill switch on.
pub const DISABLED_ENV: &str = "TOLLGATE_DISABLED";

const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_SWEEP_SECS: u64 = 60;
const DEFAULT_RETENTION_HORIZON_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Complete limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Global kill switch: every check is allowed without touching cache or store.
    pub disabled: bool,
    /// Policy for routes not listed in `routes`.
    pub default_policy: RoutePolicy,
    /// Per-route policies.
    pub routes: HashMap<String, RoutePolicy>,
    /// Nominal lifetime of a local cache entry; entries untouched for twice
    /// this long are evicted even if their window is still live.
    pub cache_ttl_secs: u64,
    /// How often the local cache is swept.
    pub cache_sweep_interval_secs: u64,
    /// Persisted rows whose window ended longer ago than this are purged.
    pub retention_horizon_secs: u64,
    /// How often the retention sweeper runs.
    pub retention_interval_secs: u64,
    /// Upper bound on the slow path; `None` waits for the store indefinitely.
    pub store_timeout_ms: Option<u64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            default_policy: RoutePolicy::default(),
            routes: HashMap::new(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_sweep_interval_secs: DEFAULT_CACHE_SWEEP_SECS,
            retention_horizon_secs: DEFAULT_RETENTION_HORIZON_SECS,
            retention_interval_secs: DEFAULT_RETENTION_INTERVAL_SECS,
            store_timeout_ms: None,
        }
    }
}

impl LimiterConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config around an existing policy table, keeping default timings.
    pub fn from_table(table: &PolicyTable) -> Self {
        Self {
            disabled: table.is_disabled(),
            default_policy: table.default_policy(),
            routes: table.routes().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Self::default()
        }
    }

    /// Add or replace a route policy.
    pub fn with_route(mut self, route: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes.insert(route.into(), policy);
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Turn the kill switch on when [`DISABLED_ENV`] is set to a truthy value.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(DISABLED_ENV) {
            if parse_truthy(&raw) {
                tracing::info!(target: "tollgate::config", "{DISABLED_ENV} set; admission checks disabled");
                self.disabled = true;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy_table().validate()?;
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration { field: "cache_ttl_secs" });
        }
        if self.cache_sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration { field: "cache_sweep_interval_secs" });
        }
        if self.retention_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration { field: "retention_interval_secs" });
        }
        if self.store_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroDuration { field: "store_timeout_ms" });
        }
        Ok(())
    }

    /// Immutable policy table derived from this config.
    pub fn policy_table(&self) -> PolicyTable {
        self.routes
            .iter()
            .fold(PolicyTable::new(self.default_policy), |table, (route, policy)| {
                table.with_route(route.clone(), *policy)
            })
            .with_disabled(self.disabled)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    pub fn retention_horizon(&self) -> Duration {
        Duration::from_secs(self.retention_horizon_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
