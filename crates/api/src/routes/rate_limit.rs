//! Rate-limit check endpoint.
//!
//! `POST /rate-limit` with `{action, identifier, maxAttempts?, timeWindowMs?}`.
//! Allowed attempts return 200, denials 429 with `Retry-After`. Log outages
//! and unexpected internal errors fail open with a 200 carrying a warning.

use axum::{body::Bytes, extract::State, http::StatusCode};
use chrono::Utc;
use ratelimit::fail_open_decision;
use serde::Deserialize;
use std::time::Duration;
use sync_core::{ErrorCode, RateLimitRequest};
use tracing::{debug, error};
use validator::Validate;

use crate::extractors::ClientMetadata;
use crate::response::{ApiError, DecisionReply};
use crate::state::AppState;

/// Returned when `action` or `identifier` is missing or blank.
pub const MISSING_FIELDS: &str = "Action and identifier are required";

/// Incoming check request.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBody {
    #[validate(length(max = 64))]
    pub action: Option<String>,
    #[validate(length(max = 256))]
    pub identifier: Option<String>,
    #[validate(range(min = 1, max = 100_000))]
    pub max_attempts: Option<u32>,
    /// Bounded by `sync_core::MAX_TIME_WINDOW_MS` (24 hours).
    #[serde(alias = "timeWindow")]
    #[validate(range(min = 1, max = 86_400_000))]
    pub time_window_ms: Option<u64>,
}

impl RateLimitBody {
    fn into_request(
        self,
        metadata: sync_core::RequestMetadata,
    ) -> Result<RateLimitRequest, ApiError> {
        let action = self.action.filter(|a| !a.trim().is_empty());
        let identifier = self.identifier.filter(|i| !i.trim().is_empty());
        let (Some(action), Some(identifier)) = (action, identifier) else {
            return Err(ApiError::bad_request(MISSING_FIELDS));
        };

        let mut request = RateLimitRequest::new(action, identifier).with_metadata(metadata);
        if let Some(max_attempts) = self.max_attempts {
            request = request.with_max_attempts(max_attempts);
        }
        if let Some(ms) = self.time_window_ms {
            request = request.with_time_window(Duration::from_millis(ms));
        }
        Ok(request)
    }
}

/// POST /rate-limit - Check and record one attempt.
pub async fn check_handler(
    State(state): State<AppState>,
    ClientMetadata(metadata): ClientMetadata,
    body: Bytes,
) -> Result<DecisionReply, ApiError> {
    let body: RateLimitBody = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejecting malformed rate limit body");
        ApiError::bad_request("Invalid JSON body")
    })?;

    let validated = body.validate();
    let request = body.into_request(metadata)?;
    validated.map_err(|errors| ApiError::validation(vec![errors.to_string()]))?;

    match state.limiter.check_and_record(&request).await {
        Ok(decision) => Ok(DecisionReply(decision)),
        Err(e) if e.kind() == ErrorCode::Validation => Err(e.into()),
        Err(e) => {
            error!(
                action = %request.action,
                identifier = %request.identifier,
                code = ErrorCode::Internal.code(),
                error = %e,
                "Rate limit check failed, failing open"
            );
            let policy = state
                .limiter
                .policy_for(&request)
                .unwrap_or_else(|_| state.limiter.policies().resolve(&request.action));
            Ok(DecisionReply(fail_open_decision(policy, Utc::now())))
        }
    }
}

/// OPTIONS /rate-limit - Preflight without CORS request headers.
pub async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}
