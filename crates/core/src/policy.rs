//! Rate-limit policies.
//!
//! Each action resolves to exactly one policy. Unknown actions fall back to
//! the generic `api_call` policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Action used when a request names an action with no policy.
pub const FALLBACK_ACTION: &str = "api_call";

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Longest rolling window a policy may use. Stays below the log table TTL.
pub const MAX_TIME_WINDOW: Duration = Duration::from_secs(24 * HOUR);

/// `MAX_TIME_WINDOW` in milliseconds, for request validation.
pub const MAX_TIME_WINDOW_MS: u64 = 24 * HOUR * 1000;

/// Built-in policies: (action, max attempts, window seconds).
const DEFAULT_POLICIES: &[(&str, u32, u64)] = &[
    ("login", 5, 15 * MINUTE),
    ("admin_access", 3, HOUR),
    ("api_call", 100, MINUTE),
    ("patient_create", 10, MINUTE),
    ("prescription_create", 20, MINUTE),
    ("bill_create", 30, MINUTE),
    ("inventory_update", 50, MINUTE),
    ("password_reset", 3, HOUR),
    ("email_send", 10, HOUR),
    ("file_upload", 20, MINUTE),
    ("search", 100, MINUTE),
    ("export", 5, MINUTE),
    ("backup", 2, HOUR),
    ("bulk_operation", 3, MINUTE),
];

/// Max attempts allowed inside a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub time_window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_attempts: u32, time_window: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::validation("maxAttempts must be a positive integer"));
        }
        if time_window.is_zero() {
            return Err(Error::validation("timeWindowMs must be positive"));
        }
        if time_window > MAX_TIME_WINDOW {
            return Err(Error::validation("timeWindowMs must not exceed 24 hours"));
        }
        Ok(Self {
            max_attempts,
            time_window,
        })
    }

    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.time_window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Policy override as written in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub max_attempts: u32,
    pub time_window_ms: u64,
}

impl TryFrom<PolicyOverride> for RateLimitPolicy {
    type Error = Error;

    fn try_from(o: PolicyOverride) -> Result<Self> {
        RateLimitPolicy::new(o.max_attempts, Duration::from_millis(o.time_window_ms))
    }
}

/// Normalize an action name: lowercase, dashes become underscores.
pub fn normalize_action(action: &str) -> String {
    action.trim().to_ascii_lowercase().replace('-', "_")
}

/// Static per-action policy table.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<String, RateLimitPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let policies = DEFAULT_POLICIES
            .iter()
            .map(|&(action, max_attempts, secs)| {
                (
                    action.to_string(),
                    RateLimitPolicy {
                        max_attempts,
                        time_window: Duration::from_secs(secs),
                    },
                )
            })
            .collect();
        Self { policies }
    }
}

impl PolicyTable {
    /// Apply configured overrides on top of the defaults.
    pub fn with_overrides(overrides: &HashMap<String, PolicyOverride>) -> Result<Self> {
        let mut table = Self::default();
        for (action, o) in overrides {
            table.set(action, RateLimitPolicy::try_from(*o)?);
        }
        Ok(table)
    }

    pub fn set(&mut self, action: &str, policy: RateLimitPolicy) {
        self.policies.insert(normalize_action(action), policy);
    }

    /// Whether the action has its own policy.
    pub fn contains(&self, action: &str) -> bool {
        self.policies.contains_key(&normalize_action(action))
    }

    /// Resolve the policy for an action, falling back to `api_call`.
    pub fn resolve(&self, action: &str) -> RateLimitPolicy {
        self.policies
            .get(&normalize_action(action))
            .or_else(|| self.policies.get(FALLBACK_ACTION))
            .copied()
            .unwrap_or(RateLimitPolicy {
                max_attempts: 100,
                time_window: Duration::from_secs(MINUTE),
            })
    }

    /// Resolve with explicit per-request overrides taking precedence.
    pub fn resolve_with(
        &self,
        action: &str,
        max_attempts: Option<u32>,
        time_window: Option<Duration>,
    ) -> Result<RateLimitPolicy> {
        let base = self.resolve(action);
        RateLimitPolicy::new(
            max_attempts.unwrap_or(base.max_attempts),
            time_window.unwrap_or(base.time_window),
        )
    }
}
