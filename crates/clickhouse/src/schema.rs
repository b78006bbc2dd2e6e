//! ClickHouse table schemas.
//!
//! - `rate_limit_log`: one row per allowed attempt, queried by composite key
//!   and time range
//! - `security_audit_log`: write-only audit trail of denials

use crate::client::ClickHouseClient;
use sync_core::StoreResult;
use tracing::debug;

pub const RATE_LIMIT_LOG: &str = "rate_limit_log";
pub const SECURITY_AUDIT_LOG: &str = "security_audit_log";

/// SQL for creating the database.
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database}")
}

/// SQL for creating the attempt log.
///
/// Rows are immutable; a TTL backs up the opportunistic cleanup.
pub fn create_rate_limit_log(database: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.{RATE_LIMIT_LOG} (
    key String,
    action LowCardinality(String),
    identifier String,
    timestamp_ms Int64,
    metadata String
)
ENGINE = MergeTree()
ORDER BY (key, timestamp_ms)
TTL toDateTime(intDiv(timestamp_ms, 1000)) + INTERVAL 2 DAY
SETTINGS index_granularity = 8192
"#
    )
}

/// SQL for creating the audit log.
pub fn create_security_audit_log(database: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.{SECURITY_AUDIT_LOG} (
    event_type LowCardinality(String),
    timestamp_ms Int64,
    details String
)
ENGINE = MergeTree()
ORDER BY (event_type, timestamp_ms)
"#
    )
}

/// Create the database and both tables if they don't exist.
pub async fn init_schema(client: &ClickHouseClient) -> StoreResult<()> {
    let database = &client.config().database;

    client
        .timed("create database", client.server().query(&create_database(database)).execute())
        .await?;

    for ddl in [create_rate_limit_log(database), create_security_audit_log(database)] {
        client
            .timed("create table", client.inner().query(&ddl).execute())
            .await?;
    }

    debug!(database = %database, "ClickHouse schema initialized");
    Ok(())
}
