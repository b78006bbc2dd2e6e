//! Tests for the rate-limit check endpoint.
//!
//! These run the real router against an in-memory log, so they need no
//! Docker.

use axum::http::{Method, StatusCode};
use axum_test::TestServer;
use integration_tests::{fixtures, setup::TestContext};
use sync_core::RATE_LIMIT_EXCEEDED;

fn server(ctx: &TestContext) -> TestServer {
    TestServer::new(ctx.router.clone()).expect("Failed to create test server")
}

/// Five logins are allowed, the sixth is denied with a Retry-After.
#[tokio::test]
async fn test_login_limit_denies_sixth_attempt() {
    let ctx = TestContext::new();
    let server = server(&ctx);
    let body = fixtures::check_body("login", "user-1");

    for expected_remaining in (0..5).rev() {
        let response = server.post("/rate-limit").json(&body).await;
        response.assert_status_ok();

        let json: serde_json::Value = response.json();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["remaining"], expected_remaining);
        assert!(json.get("retryAfter").is_none());
    }

    let response = server.post("/rate-limit").json(&body).await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);

    let json: serde_json::Value = response.json();
    assert_eq!(json["allowed"], false);
    assert_eq!(json["remaining"], 0);
    let retry_after = json["retryAfter"].as_u64().expect("retryAfter should be set");
    assert!(retry_after > 0 && retry_after <= 15 * 60);

    let header = response
        .headers()
        .get("retry-after")
        .expect("Retry-After header should be set");
    assert_eq!(header.to_str().unwrap(), retry_after.to_string());
    assert_eq!(ctx.store.records().len(), 5, "denials must not be logged");
}

/// Denials are written to the security audit log.
#[tokio::test]
async fn test_denial_is_audited() {
    let ctx = TestContext::new();
    let server = server(&ctx);
    let body = fixtures::check_body_with_policy("export", "user-2", 1, 60_000);

    server.post("/rate-limit").json(&body).await.assert_status_ok();
    server
        .post("/rate-limit")
        .json(&body)
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    let audit = ctx.audit.captured();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, RATE_LIMIT_EXCEEDED);
}

/// Identifiers are limited independently.
#[tokio::test]
async fn test_identifiers_are_independent() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let first = fixtures::check_body_with_policy("login", "alice", 1, 60_000);
    let second = fixtures::check_body_with_policy("login", "bob", 1, 60_000);

    server.post("/rate-limit").json(&first).await.assert_status_ok();
    server.post("/rate-limit").json(&second).await.assert_status_ok();
    server
        .post("/rate-limit")
        .json(&first)
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

/// Rate-limit headers accompany every decision.
#[tokio::test]
async fn test_rate_limit_headers() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body("search", &fixtures::unique_identifier("user")))
        .await;
    response.assert_status_ok();

    let headers = response.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "100");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "99");
    assert!(headers.get("x-ratelimit-reset").is_some());
}

/// Missing identifier is a 400 with the fixed message.
#[tokio::test]
async fn test_missing_fields() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .json(&serde_json::json!({ "action": "login" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: serde_json::Value = response.json();
    assert_eq!(json["error"], "Action and identifier are required");
    assert_eq!(ctx.store.call_count(), 0);
}

/// Blank strings count as missing.
#[tokio::test]
async fn test_blank_identifier() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body("login", "   "))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

/// Malformed JSON is rejected before the limiter runs.
#[tokio::test]
async fn test_invalid_json() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .content_type("application/json")
        .bytes("{not json".into())
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: serde_json::Value = response.json();
    assert_eq!(json["error"], "Invalid JSON body");
}

/// Out-of-range overrides fail validation.
#[tokio::test]
async fn test_invalid_override() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body_with_policy("login", "user-3", 0, 1_000))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: serde_json::Value = response.json();
    assert_eq!(json["code"], "VALID_001");
}

/// Windows beyond the limiter maximum are rejected, not evaluated.
#[tokio::test]
async fn test_oversized_window_rejected() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body_with_policy(
            "login",
            "user-5",
            5,
            10_000_000_000_000_000,
        ))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: serde_json::Value = response.json();
    assert_eq!(json["code"], "VALID_001");
    assert_eq!(ctx.store.call_count(), 0);
}

/// An unreachable log fails open with a warning.
#[tokio::test]
async fn test_store_failure_fails_open() {
    let ctx = TestContext::new();
    let server = server(&ctx);
    ctx.set_store_failure(true);

    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body("login", "user-4"))
        .await;
    response.assert_status_ok();

    let json: serde_json::Value = response.json();
    assert_eq!(json["allowed"], true);
    assert_eq!(json["warning"], "Rate limiting temporarily unavailable");

    ctx.set_store_failure(false);
    let response = server
        .post("/rate-limit")
        .json(&fixtures::check_body("login", "user-4"))
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert!(json.get("warning").is_none());
}

/// Only POST and OPTIONS are routed.
#[tokio::test]
async fn test_get_not_allowed() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server.get("/rate-limit").await;
    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

/// Preflight succeeds and advertises the allowed request headers.
#[tokio::test]
async fn test_cors_preflight() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .method(Method::OPTIONS, "/rate-limit")
        .add_header("Origin", "https://pharmacy.example")
        .add_header("Access-Control-Request-Method", "POST")
        .add_header("Access-Control-Request-Headers", "content-type,apikey")
        .await;
    response.assert_status_ok();

    let headers = response.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    let allowed = headers
        .get("access-control-allow-headers")
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("apikey"));
    assert!(allowed.contains("x-client-info"));
}

/// Bare OPTIONS without CORS headers still answers 200.
#[tokio::test]
async fn test_bare_options() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server.method(Method::OPTIONS, "/rate-limit").await;
    response.assert_status_ok();
}

/// Cross-origin responses expose the rate-limit headers.
#[tokio::test]
async fn test_cors_exposes_headers() {
    let ctx = TestContext::new();
    let server = server(&ctx);

    let response = server
        .post("/rate-limit")
        .add_header("Origin", "https://pharmacy.example")
        .json(&fixtures::check_body("login", &fixtures::unique_identifier("cors")))
        .await;
    response.assert_status_ok();

    let exposed = response
        .headers()
        .get("access-control-expose-headers")
        .expect("expose headers should be set")
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("x-ratelimit-remaining"));
    assert!(exposed.contains("retry-after"));
}
