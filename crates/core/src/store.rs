//! Storage ports for the rate-limit log and the security audit log.
//!
//! Implemented by the ClickHouse client in production and by an in-memory
//! store for development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::records::{AuditEntry, RateLimitRecord};

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable, append-only log of rate-limited attempts.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Records for `key` with `timestamp >= since`, newest first.
    async fn recent(&self, key: &str, since: DateTime<Utc>) -> StoreResult<Vec<RateLimitRecord>>;

    /// Append one record.
    async fn append(&self, record: RateLimitRecord) -> StoreResult<()>;

    /// Delete records for `action` older than `cutoff`. Returns rows removed
    /// when the backend reports it.
    async fn purge_before(&self, action: &str, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Write-only sink for security audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()>;
}
