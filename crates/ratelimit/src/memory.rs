//! In-memory log store and audit sink.
//!
//! Used for local development and tests. Both can be switched into an
//! unavailable mode to exercise the fail-open path.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sync_core::{
    AuditEntry, AuditSink, BackendProbe, RateLimitRecord, RateLimitStore, StoreError, StoreResult,
};

/// Rate-limit log kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<RateLimitRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<RateLimitRecord> {
        self.records.lock().clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable("memory store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn recent(&self, key: &str, since: DateTime<Utc>) -> StoreResult<Vec<RateLimitRecord>> {
        self.check_available()?;
        let mut matching: Vec<RateLimitRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.key == key && r.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching)
    }

    async fn append(&self, record: RateLimitRecord) -> StoreResult<()> {
        self.check_available()?;
        self.records.lock().push(record);
        Ok(())
    }

    async fn purge_before(&self, action: &str, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check_available()?;
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.action != action || r.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[async_trait]
impl BackendProbe for MemoryStore {
    async fn probe(&self) -> StoreResult<()> {
        self.check_available()
    }
}

/// Audit log kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    unavailable: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable("audit log offline"));
        }
        self.entries.lock().push(entry);
        Ok(())
    }
}
