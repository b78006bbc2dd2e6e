//! Limiter against a real ClickHouse log.
//!
//! Requires Docker to be running for the ClickHouse testcontainer, or
//! `PHARMACY_SYNC_TEST_CLICKHOUSE_URL` pointing at a server.

use chrono::{Duration, Utc};
use clickhouse_client::check_connection;
use integration_tests::{fixtures, setup::ClickHouseContext};
use sync_core::{
    RateLimitRecord, RateLimitRequest, RateLimitStore, RequestMetadata, RATE_LIMIT_EXCEEDED,
};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_connection_and_schema() {
    let ctx = ClickHouseContext::new().await;
    assert!(check_connection(ctx.store.client()).await);
    assert!(!ctx.clickhouse_url().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_window_enforced_against_clickhouse() {
    let ctx = ClickHouseContext::new().await;
    let identifier = fixtures::unique_identifier("ch");
    let request = RateLimitRequest::new("export", identifier.as_str());

    for _ in 0..5 {
        let decision = ctx.limiter.check_and_record(&request).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.warning.is_none());
    }

    let denied = ctx.limiter.check_and_record(&request).await.unwrap();
    assert!(!denied.allowed);
    assert!(denied.retry_after.unwrap() > 0);

    let audit = ctx.store.audit_entries(RATE_LIMIT_EXCEEDED).await.unwrap();
    assert!(audit.iter().any(|row| row.details.contains(&identifier)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_recent_and_purge() {
    let ctx = ClickHouseContext::new().await;
    let identifier = fixtures::unique_identifier("purge");
    let now = Utc::now();
    let key = sync_core::composite_key("search", &identifier);

    for age in [10, 90, 600] {
        let record = RateLimitRecord::new(
            "search",
            &identifier,
            now - Duration::seconds(age),
            RequestMetadata::default(),
        );
        ctx.store.append(record).await.unwrap();
    }

    let recent = ctx.store.recent(&key, now - Duration::seconds(60)).await.unwrap();
    assert_eq!(recent.len(), 1);

    ctx.store
        .purge_before("search", now - Duration::seconds(120))
        .await
        .unwrap();
    let remaining = ctx.store.recent(&key, now - Duration::hours(1)).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining[0].timestamp > remaining[1].timestamp);
}
