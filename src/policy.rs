//! Route policy table.
//!
//! Maps a route identifier to its `{window, max}` quota. Unknown routes resolve
//! to the default policy; lookups never fail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Quota for one route: at most `max` admissions per `window` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Window length in seconds.
    pub window: u64,
    /// Admissions allowed per window.
    pub max: u32,
}

impl RoutePolicy {
    pub const fn new(window_secs: u64, max: u32) -> Self {
        Self { window: window_secs, max }
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window)
    }

    pub fn window_millis(&self) -> u64 {
        self.window.saturating_mul(1_000)
    }

    /// Reject policies that could never admit anything or never roll over.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::InvalidWindow { provided: self.window });
        }
        if self.max == 0 {
            return Err(ConfigError::InvalidMax { provided: self.max });
        }
        Ok(())
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::new(60, 10)
    }
}

/// Static route → policy mapping plus the global kill switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    routes: HashMap<String, RoutePolicy>,
    default_policy: RoutePolicy,
    disabled: bool,
}

impl PolicyTable {
    pub fn new(default_policy: RoutePolicy) -> Self {
        Self { routes: HashMap::new(), default_policy, disabled: false }
    }

    /// Add or replace the policy for `route`.
    pub fn with_route(mut self, route: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes.insert(route.into(), policy);
        self
    }

    /// Force every admission check to short-circuit to "allowed".
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Policy for `route`, falling back to the default.
    pub fn policy_for(&self, route: &str) -> RoutePolicy {
        self.routes.get(route).copied().unwrap_or(self.default_policy)
    }

    pub fn default_policy(&self) -> RoutePolicy {
        self.default_policy
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &RoutePolicy)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Validate the default and every configured route.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_policy.validate()?;
        for (route, policy) in &self.routes {
            policy
                .validate()
                .map_err(|e| ConfigError::InvalidRoute { route: route.clone(), reason: e.to_string() })?;
        }
        Ok(())
    }
}
