//! Rate-limit log records, requests, decisions, and audit entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Audit event type written when a request is denied.
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

/// Caller metadata captured for audit purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// One row in the durable rate-limit log. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub key: String,
    pub action: String,
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: RequestMetadata,
}

impl RateLimitRecord {
    pub fn new(
        action: &str,
        identifier: &str,
        timestamp: DateTime<Utc>,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            key: composite_key(action, identifier),
            action: action.to_string(),
            identifier: identifier.to_string(),
            timestamp,
            metadata,
        }
    }
}

/// Composite log key for an action/identifier pair.
pub fn composite_key(action: &str, identifier: &str) -> String {
    format!("{action}:{identifier}")
}

/// A request to check (and record) one attempt.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    pub action: String,
    pub identifier: String,
    pub max_attempts: Option<u32>,
    pub time_window: Option<Duration>,
    pub metadata: RequestMetadata,
}

impl RateLimitRequest {
    pub fn new(action: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Both action and identifier must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.action.trim().is_empty() || self.identifier.trim().is_empty() {
            return Err(Error::validation("Action and identifier are required"));
        }
        Ok(())
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Max attempts of the policy that produced this decision.
    pub limit: u32,
    pub reset_time: DateTime<Utc>,
    /// Whole seconds until a slot frees up; set on denial.
    pub retry_after: Option<u64>,
    /// Set when the decision was produced by failing open.
    pub warning: Option<String>,
}

impl RateLimitDecision {
    pub fn reset_time_millis(&self) -> i64 {
        self.reset_time.timestamp_millis()
    }
}

/// Entry for the write-only security audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Audit entry for a denied attempt.
    pub fn rate_limit_exceeded(
        request: &RateLimitRequest,
        attempts: usize,
        max_attempts: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: RATE_LIMIT_EXCEEDED.to_string(),
            timestamp,
            details: serde_json::json!({
                "action": request.action,
                "identifier": request.identifier,
                "attempts": attempts,
                "maxAttempts": max_attempts,
                "userAgent": request.metadata.user_agent,
                "ip": request.metadata.ip,
            }),
        }
    }
}
