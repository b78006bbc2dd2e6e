//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ratelimit::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sync_core::{
    AuditEntry, AuditSink, BackendProbe, RateLimitRecord, RateLimitStore, StoreError, StoreResult,
};

/// Log store that delegates to memory and can be switched offline.
///
/// Counts calls so tests can tell whether a request reached the log at all.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<MemoryStore>,
    should_fail: Arc<Mutex<bool>>,
    calls: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure mode for testing the fail-open path.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    /// Records appended so far.
    pub fn records(&self) -> Vec<RateLimitRecord> {
        self.inner.records()
    }

    /// Number of store calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if *self.should_fail.lock() {
            return Err(StoreError::unavailable("mock store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MockStore {
    async fn recent(&self, key: &str, since: DateTime<Utc>) -> StoreResult<Vec<RateLimitRecord>> {
        self.check()?;
        self.inner.recent(key, since).await
    }

    async fn append(&self, record: RateLimitRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.append(record).await
    }

    async fn purge_before(&self, action: &str, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check()?;
        self.inner.purge_before(action, cutoff).await
    }
}

#[async_trait]
impl BackendProbe for MockStore {
    async fn probe(&self) -> StoreResult<()> {
        self.check()
    }
}

/// Audit sink that captures entries in memory.
#[derive(Clone, Default)]
pub struct MockAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured entries.
    pub fn captured(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}
