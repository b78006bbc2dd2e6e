//! API routes.

pub mod health;
pub mod rate_limit;

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::response::{HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("apikey"),
            HeaderName::from_static("x-client-info"),
        ])
        .expose_headers([HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, header::RETRY_AFTER]);

    Router::new()
        .route(
            "/rate-limit",
            post(rate_limit::check_handler).options(rate_limit::preflight_handler),
        )
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use ratelimit::{MemoryAuditLog, MemoryStore, RateLimitSettings, RateLimiter};
    use realtime::{
        LocalBroker, MemoryStorage, MonitorConfig, PropagatorConfig, RealtimeConfig, SyncHub,
    };
    use std::sync::Arc;

    fn server() -> TestServer {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store.clone(),
            Arc::new(MemoryAuditLog::new()),
            &RateLimitSettings::default(),
        )
        .unwrap();
        let hub = SyncHub::new(
            Arc::new(LocalBroker::new()),
            Arc::new(MemoryStorage::new()),
            store,
            RealtimeConfig::default(),
            &PropagatorConfig::default(),
            MonitorConfig::default(),
        );
        TestServer::new(router(AppState::new(Arc::new(limiter), Arc::new(hub)))).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_allows_client_headers() {
        let response = server()
            .method(Method::OPTIONS, "/rate-limit")
            .add_header("origin", "https://pharmacy.example")
            .add_header("access-control-request-method", "POST")
            .add_header("access-control-request-headers", "apikey")
            .await;

        response.assert_status_ok();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_check_allowed() {
        let response = server()
            .post("/rate-limit")
            .json(&serde_json::json!({ "action": "login", "identifier": "user-1" }))
            .await;

        response.assert_status_ok();
        assert_eq!(response.headers()[HEADER_LIMIT], "5");
        assert_eq!(response.headers()[HEADER_REMAINING], "4");
    }

    #[tokio::test]
    async fn test_oversized_window_is_bad_request() {
        let response = server()
            .post("/rate-limit")
            .json(&serde_json::json!({
                "action": "login",
                "identifier": "user-1",
                "timeWindowMs": 10_000_000_000_000_000u64,
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], "VALID_001");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        server().get("/ingest").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_liveness() {
        server().get("/health/live").await.assert_status_ok();
    }
}
