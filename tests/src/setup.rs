//! Common test setup functions.

use api::{router, state::AppState};
use axum::Router;
use clickhouse_client::{init_schema, ClickHouseClient, ClickHouseConfig, ClickHouseStore};
use ratelimit::{RateLimitSettings, RateLimiter};
use realtime::{
    CrossTabStorage, EventPropagator, LocalBroker, MemoryStorage, MonitorConfig, PropagatorConfig,
    RealtimeConfig, RealtimeTransport, SyncHub,
};
use std::sync::Arc;
use sync_core::{AuditSink, BackendProbe, BillEvent, RateLimitStore};

use crate::containers::TestContainers;
use crate::mocks::{MockAuditSink, MockStore};

/// Settings with garbage collection off, so log contents are deterministic.
pub fn test_settings() -> RateLimitSettings {
    RateLimitSettings {
        gc_probability: 0.0,
        ..Default::default()
    }
}

/// Test context with an in-memory log and an in-process change feed.
///
/// This exercises the same production code paths by:
/// - Using the real Axum router with all layers
/// - Using MockStore which implements the RateLimitStore trait
/// - Using LocalBroker and MemoryStorage behind the real SyncHub
pub struct TestContext {
    pub store: MockStore,
    pub audit: MockAuditSink,
    pub broker: LocalBroker,
    pub storage: Arc<MemoryStorage>,
    pub hub: Arc<SyncHub>,
    pub router: Router,
}

impl TestContext {
    /// Create a new test context. Must run inside a Tokio runtime.
    pub fn new() -> Self {
        let store = MockStore::new();
        let audit = MockAuditSink::new();
        let limiter = RateLimiter::new(
            Arc::new(store.clone()) as Arc<dyn RateLimitStore>,
            Arc::new(audit.clone()) as Arc<dyn AuditSink>,
            &test_settings(),
        )
        .expect("Failed to build limiter");

        let broker = LocalBroker::new();
        let storage = Arc::new(MemoryStorage::new());
        let hub = Arc::new(SyncHub::new(
            Arc::new(broker.clone()) as Arc<dyn RealtimeTransport>,
            storage.clone() as Arc<dyn CrossTabStorage>,
            Arc::new(store.clone()) as Arc<dyn BackendProbe>,
            RealtimeConfig::default(),
            &PropagatorConfig::default(),
            MonitorConfig::default(),
        ));

        let state = AppState::new(Arc::new(limiter), hub.clone());
        let router = router(state);

        Self {
            store,
            audit,
            broker,
            storage,
            hub,
            router,
        }
    }

    /// A second tab sharing this context's storage.
    pub fn other_tab(&self) -> EventPropagator<BillEvent> {
        EventPropagator::new(
            self.storage.clone() as Arc<dyn CrossTabStorage>,
            PropagatorConfig::default().staleness(),
        )
    }

    /// Set the mock store to fail (for fail-open testing).
    pub fn set_store_failure(&self, should_fail: bool) {
        self.store.set_should_fail(should_fail);
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.hub.dispose();
    }
}

/// Test context backed by a real ClickHouse testcontainer.
pub struct ClickHouseContext {
    pub containers: TestContainers,
    pub store: Arc<ClickHouseStore>,
    pub limiter: Arc<RateLimiter>,
}

impl ClickHouseContext {
    pub async fn new() -> Self {
        let containers = TestContainers::start().await;

        let config = ClickHouseConfig {
            url: containers.clickhouse_url.clone(),
            database: containers.clickhouse_database.clone(),
            username: containers.clickhouse_username.clone(),
            password: containers.clickhouse_password.clone(),
            timeout_ms: 10_000,
        };
        let client = ClickHouseClient::new(config);

        init_schema(&client)
            .await
            .expect("Failed to initialize schema");

        let store = Arc::new(ClickHouseStore::new(client));
        let limiter = RateLimiter::new(
            store.clone() as Arc<dyn RateLimitStore>,
            store.clone() as Arc<dyn AuditSink>,
            &test_settings(),
        )
        .expect("Failed to build limiter");

        Self {
            containers,
            store,
            limiter: Arc::new(limiter),
        }
    }

    /// Get the ClickHouse URL.
    pub fn clickhouse_url(&self) -> &str {
        &self.containers.clickhouse_url
    }
}
