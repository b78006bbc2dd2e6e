//! Sliding-window rate limiter service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sync_core::{
    composite_key, normalize_action, to_chrono, AuditEntry, AuditSink, Error, ErrorCode,
    FailurePolicy, PolicyOverride, PolicyTable, RateLimitDecision, RateLimitPolicy,
    RateLimitRecord, RateLimitRequest, RateLimitStore, Result, SharedClock, StoreError,
    StoreResult, SystemClock,
};
use telemetry::{health, metrics};
use tracing::{debug, warn};

/// Warning attached to decisions produced while the log is unreachable.
pub const FAIL_OPEN_WARNING: &str = "Rate limiting temporarily unavailable";

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Fraction of checks that also sweep expired log records.
    #[serde(default = "default_gc_probability")]
    pub gc_probability: f64,
    /// Per-action overrides applied on top of the built-in table.
    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,
}

fn default_gc_probability() -> f64 {
    0.1
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            gc_probability: default_gc_probability(),
            policies: HashMap::new(),
        }
    }
}

/// Sliding-window limiter over a durable attempt log.
///
/// The count-then-append sequence is not atomic: concurrent requests for the
/// same key near the limit can both be allowed.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    audit: Arc<dyn AuditSink>,
    policies: PolicyTable,
    clock: SharedClock,
    gc_probability: f64,
    store_failure: FailurePolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        audit: Arc<dyn AuditSink>,
        settings: &RateLimitSettings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            audit,
            policies: PolicyTable::with_overrides(&settings.policies)?,
            clock: Arc::new(SystemClock),
            gc_probability: settings.gc_probability.clamp(0.0, 1.0),
            store_failure: FailurePolicy::FailOpen,
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Override how log outages are handled (fail open by default).
    pub fn with_store_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.store_failure = policy;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Resolve the policy a request would be checked against.
    pub fn policy_for(&self, request: &RateLimitRequest) -> Result<RateLimitPolicy> {
        self.policies
            .resolve_with(&request.action, request.max_attempts, request.time_window)
    }

    /// Check one attempt and record it if allowed.
    ///
    /// Denials are returned as `allowed = false` decisions, not errors. Only
    /// invalid input (or a log outage under `FailClosed`) is an `Err`.
    pub async fn check_and_record(&self, request: &RateLimitRequest) -> Result<RateLimitDecision> {
        request.validate()?;
        let policy = self.policy_for(request)?;

        metrics().rate_limit_checks.inc();
        let started = Instant::now();
        let outcome = self.evaluate(request, policy).await;
        metrics()
            .rate_limit_check_latency_ms
            .observe(started.elapsed().as_millis() as u64);

        match outcome {
            Ok(decision) => {
                if !health().log_store.is_healthy() {
                    health().log_store.set_healthy();
                }
                Ok(decision)
            }
            Err(e) => self.on_store_failure(request, policy, e),
        }
    }

    async fn evaluate(
        &self,
        request: &RateLimitRequest,
        policy: RateLimitPolicy,
    ) -> StoreResult<RateLimitDecision> {
        let action = normalize_action(&request.action);
        let now = self.clock.now();
        let window = to_chrono(policy.time_window);
        let window_start = before(now, window);
        let key = composite_key(&action, &request.identifier);

        let records = self.store.recent(&key, window_start).await?;
        let count = records.len();

        self.maybe_collect_garbage(&action, policy, now).await;

        if count >= policy.max_attempts as usize {
            let oldest = records.iter().map(|r| r.timestamp).min().unwrap_or(now);
            let reset_time = after(oldest, window);
            let retry_after = retry_after_secs(reset_time, now);

            warn!(
                action = %action,
                identifier = %request.identifier,
                code = ErrorCode::QuotaExceeded.code(),
                attempts = count,
                max_attempts = policy.max_attempts,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            metrics().rate_limit_denied.inc();
            self.audit_denial(request, count, policy.max_attempts, now)
                .await;

            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit: policy.max_attempts,
                reset_time,
                retry_after: Some(retry_after),
                warning: None,
            });
        }

        let record =
            RateLimitRecord::new(&action, &request.identifier, now, request.metadata.clone());
        self.store.append(record).await?;
        metrics().rate_limit_allowed.inc();

        let remaining = policy
            .max_attempts
            .saturating_sub(count as u32)
            .saturating_sub(1);

        debug!(
            action = %action,
            identifier = %request.identifier,
            remaining = remaining,
            "Rate limit check allowed"
        );

        Ok(RateLimitDecision {
            allowed: true,
            remaining,
            limit: policy.max_attempts,
            reset_time: after(now, window),
            retry_after: None,
            warning: None,
        })
    }

    fn on_store_failure(
        &self,
        request: &RateLimitRequest,
        policy: RateLimitPolicy,
        error: StoreError,
    ) -> Result<RateLimitDecision> {
        health().log_store.set_unhealthy(error.to_string());

        match self.store_failure {
            FailurePolicy::FailClosed => Err(Error::StorageUnavailable(error)),
            FailurePolicy::FailOpen => {
                warn!(
                    action = %request.action,
                    identifier = %request.identifier,
                    error = %error,
                    "Rate limit log unavailable, failing open"
                );
                metrics().rate_limit_fail_open.inc();
                Ok(fail_open_decision(policy, self.clock.now()))
            }
        }
    }

    async fn audit_denial(
        &self,
        request: &RateLimitRequest,
        attempts: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) {
        let entry = AuditEntry::rate_limit_exceeded(request, attempts, max_attempts, now);
        if let Err(e) = self.audit.record(entry).await {
            warn!(error = %e, "Failed to write rate limit audit entry");
        }
    }

    /// Sweep records of `action` that no window for it can still count.
    ///
    /// The cutoff uses the longer of the action's configured window and the
    /// request's own window, so a short per-request override never trims
    /// records other identifiers still need.
    async fn maybe_collect_garbage(
        &self,
        action: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) {
        if self.gc_probability <= 0.0 || !rand::thread_rng().gen_bool(self.gc_probability) {
            return;
        }

        let retention = self.policies.resolve(action).time_window.max(policy.time_window);
        let cutoff = before(now, to_chrono(retention));

        match self.store.purge_before(action, cutoff).await {
            Ok(removed) => {
                metrics().rate_limit_gc_sweeps.inc();
                debug!(action = %action, removed = removed, "Purged expired rate limit records");
            }
            Err(e) => warn!(action = %action, error = %e, "Rate limit log cleanup failed"),
        }
    }
}

/// Decision returned when the log cannot be consulted.
pub fn fail_open_decision(policy: RateLimitPolicy, now: DateTime<Utc>) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        remaining: policy.max_attempts.saturating_sub(1),
        limit: policy.max_attempts,
        reset_time: after(now, to_chrono(policy.time_window)),
        retry_after: None,
        warning: Some(FAIL_OPEN_WARNING.to_string()),
    }
}

fn before(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn after(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds from `now` until `reset_time`, rounded up, never negative.
fn retry_after_secs(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (reset_time - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}
