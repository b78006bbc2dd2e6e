//! Standardized API responses.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use realtime::{ChannelInfo, ConnectionStatus};
use serde::{Deserialize, Serialize};
use sync_core::{ErrorCode, RateLimitDecision};
use telemetry::{ComponentHealthReport, MetricsSnapshot};

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a rate-limit check response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds
    pub reset_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<&RateLimitDecision> for RateLimitResponse {
    fn from(decision: &RateLimitDecision) -> Self {
        Self {
            allowed: decision.allowed,
            remaining: decision.remaining,
            reset_time: decision.reset_time_millis(),
            retry_after: decision.retry_after,
            warning: decision.warning.clone(),
        }
    }
}

/// A limiter decision rendered as 200 or 429 with rate-limit headers.
pub struct DecisionReply(pub RateLimitDecision);

impl IntoResponse for DecisionReply {
    fn into_response(self) -> Response {
        let decision = self.0;
        let status = if decision.allowed {
            StatusCode::OK
        } else {
            StatusCode::TOO_MANY_REQUESTS
        };

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_time_millis()));
        if let Some(retry_after) = decision.retry_after {
            headers.insert("retry-after", HeaderValue::from(retry_after));
        }

        (status, headers, Json(RateLimitResponse::from(&decision))).into_response()
    }
}

/// Full health report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub components: Vec<ComponentHealthReport>,
    pub connection: ConnectionStatus,
    pub channels: Vec<ChannelInfo>,
    pub metrics: MetricsSnapshot,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// API error type with coded error bodies.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, ErrorCode::Validation.code(), msg)
    }

    pub fn validation(errors: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            response: ErrorResponse::new("Validation failed", ErrorCode::Validation.code())
                .with_details(errors),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<sync_core::Error> for ApiError {
    fn from(err: sync_core::Error) -> Self {
        match &err {
            sync_core::Error::Validation(msg) => ApiError::bad_request(msg),
            _ => {
                let status = StatusCode::from_u16(err.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                ApiError::with_code(status, err.error_code(), err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn decision(allowed: bool) -> RateLimitDecision {
        RateLimitDecision {
            allowed,
            remaining: if allowed { 4 } else { 0 },
            limit: 5,
            reset_time: Utc.timestamp_millis_opt(1_700_000_900_000).unwrap(),
            retry_after: (!allowed).then_some(120),
            warning: None,
        }
    }

    #[test]
    fn test_allowed_reply() {
        let response = DecisionReply(decision(true)).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert_eq!(response.headers()["x-ratelimit-reset"], "1700000900000");
        assert!(response.headers().get("retry-after").is_none());
    }

    #[test]
    fn test_denied_reply() {
        let response = DecisionReply(decision(false)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "120");
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(RateLimitResponse::from(&decision(false))).unwrap();
        assert_eq!(body["allowed"], false);
        assert_eq!(body["resetTime"], 1_700_000_900_000_i64);
        assert_eq!(body["retryAfter"], 120);
        assert!(body.get("warning").is_none());
    }

    #[test]
    fn test_core_error_mapping() {
        let err = ApiError::from(sync_core::Error::validation("maxAttempts must be positive"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.response.code, "VALID_001");
        assert_eq!(err.response.error, "maxAttempts must be positive");

        let store_err = sync_core::StoreError::unavailable("down");
        let err = ApiError::from(sync_core::Error::from(store_err));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.response.code, "STORE_001");
    }
}
