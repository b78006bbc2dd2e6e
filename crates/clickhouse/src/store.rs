//! `RateLimitStore` and `AuditSink` over ClickHouse.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use sync_core::{
    AuditEntry, AuditSink, RateLimitRecord, RateLimitStore, RequestMetadata, StoreError,
    StoreResult,
};
use tracing::debug;

use crate::client::ClickHouseClient;
use crate::schema::{RATE_LIMIT_LOG, SECURITY_AUDIT_LOG};

/// Row layout of `rate_limit_log`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct RateLimitRow {
    pub key: String,
    pub action: String,
    pub identifier: String,
    pub timestamp_ms: i64,
    /// JSON-encoded `RequestMetadata`
    pub metadata: String,
}

impl RateLimitRow {
    fn from_record(record: &RateLimitRecord) -> StoreResult<Self> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        Ok(Self {
            key: record.key.clone(),
            action: record.action.clone(),
            identifier: record.identifier.clone(),
            timestamp_ms: record.timestamp.timestamp_millis(),
            metadata,
        })
    }

    fn into_record(self) -> RateLimitRecord {
        // Metadata is audit-only; a bad blob must not hide the attempt.
        let metadata: RequestMetadata = serde_json::from_str(&self.metadata).unwrap_or_default();
        RateLimitRecord {
            key: self.key,
            action: self.action,
            identifier: self.identifier,
            timestamp: from_millis(self.timestamp_ms),
            metadata,
        }
    }
}

/// Row layout of `security_audit_log`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct AuditRow {
    pub event_type: String,
    pub timestamp_ms: i64,
    pub details: String,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// ClickHouse-backed attempt log and audit sink.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: ClickHouseClient,
}

impl ClickHouseStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    /// Read back audit entries (tests and admin tooling).
    pub async fn audit_entries(&self, event_type: &str) -> StoreResult<Vec<AuditRow>> {
        let sql = format!(
            "SELECT ?fields FROM {} WHERE event_type = ? ORDER BY timestamp_ms DESC",
            self.client.table(SECURITY_AUDIT_LOG)
        );
        self.client
            .timed(
                "audit query",
                self.client.inner().query(&sql).bind(event_type).fetch_all::<AuditRow>(),
            )
            .await
    }
}

#[async_trait]
impl RateLimitStore for ClickHouseStore {
    async fn recent(&self, key: &str, since: DateTime<Utc>) -> StoreResult<Vec<RateLimitRecord>> {
        let sql = format!(
            "SELECT ?fields FROM {} WHERE key = ? AND timestamp_ms >= ? ORDER BY timestamp_ms DESC",
            self.client.table(RATE_LIMIT_LOG)
        );
        let rows = self
            .client
            .timed(
                "window query",
                self.client
                    .inner()
                    .query(&sql)
                    .bind(key)
                    .bind(since.timestamp_millis())
                    .fetch_all::<RateLimitRow>(),
            )
            .await?;

        Ok(rows.into_iter().map(RateLimitRow::into_record).collect())
    }

    async fn append(&self, record: RateLimitRecord) -> StoreResult<()> {
        let row = RateLimitRow::from_record(&record)?;
        let table = self.client.table(RATE_LIMIT_LOG);

        self.client
            .timed("append", async {
                let mut insert = self.client.inner().insert(&table)?;
                insert.write(&row).await?;
                insert.end().await
            })
            .await
    }

    async fn purge_before(&self, action: &str, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let table = self.client.table(RATE_LIMIT_LOG);
        let cutoff_ms = cutoff.timestamp_millis();

        let count_sql =
            format!("SELECT count() FROM {table} WHERE action = ? AND timestamp_ms < ?");
        let expired: u64 = self
            .client
            .timed(
                "count expired",
                self.client
                    .inner()
                    .query(&count_sql)
                    .bind(action)
                    .bind(cutoff_ms)
                    .fetch_one::<u64>(),
            )
            .await?;

        if expired == 0 {
            return Ok(0);
        }

        let delete_sql = format!("DELETE FROM {table} WHERE action = ? AND timestamp_ms < ?");
        self.client
            .timed(
                "purge",
                self.client
                    .inner()
                    .query(&delete_sql)
                    .bind(action)
                    .bind(cutoff_ms)
                    .execute(),
            )
            .await?;

        debug!(action = %action, removed = expired, "Purged rate limit log");
        Ok(expired)
    }
}

#[async_trait]
impl AuditSink for ClickHouseStore {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()> {
        let row = AuditRow {
            event_type: entry.event_type,
            timestamp_ms: entry.timestamp.timestamp_millis(),
            details: entry.details.to_string(),
        };
        let table = self.client.table(SECURITY_AUDIT_LOG);

        self.client
            .timed("audit insert", async {
                let mut insert = self.client.inner().insert(&table)?;
                insert.write(&row).await?;
                insert.end().await
            })
            .await
    }
}
