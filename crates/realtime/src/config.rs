//! Real-time configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Multiplexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-callback delivery throttle window in milliseconds
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// First reconnect delay; doubles per attempt
    #[serde(default = "default_base_reconnect_delay_ms")]
    pub base_reconnect_delay_ms: u64,
    /// Reconnect attempts before a channel is left disconnected
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_base_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            base_reconnect_delay_ms: default_base_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl RealtimeConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Backoff before reconnect attempt number `attempt` (0-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_reconnect_delay_ms.saturating_mul(factor))
    }
}

/// Cross-tab propagation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatorConfig {
    /// Cross-tab events older than this are not replayed
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

fn default_staleness_secs() -> u64 {
    30
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
        }
    }
}

impl PropagatorConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

/// Connection monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Probe latency at or above this is classified slow
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    /// HTTP endpoint to probe instead of the log store
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_slow_threshold_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            slow_threshold_ms: default_slow_threshold_ms(),
            probe_url: None,
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}
