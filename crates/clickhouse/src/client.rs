//! ClickHouse client wrapper.

use std::future::Future;
use std::time::Duration;

use clickhouse::Client;
use sync_core::{StoreError, StoreResult};
use tracing::info;

use crate::config::ClickHouseConfig;

/// ClickHouse client wrapper with a per-call deadline.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    /// Creates a new ClickHouse client.
    pub fn new(config: ClickHouseConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }

        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }

        info!(
            url = %config.url,
            database = %config.database,
            "Created ClickHouse client"
        );

        Self {
            inner: client,
            config,
        }
    }

    /// Returns the inner clickhouse client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Client not bound to the service database (for `CREATE DATABASE`).
    pub fn server(&self) -> Client {
        self.inner.clone().with_database("default")
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Fully qualified table name.
    pub fn table(&self, name: &str) -> String {
        format!("{}.{}", self.config.database, name)
    }

    /// Run a ClickHouse call under the configured deadline.
    pub async fn timed<T, F>(&self, what: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, clickhouse::error::Error>>,
    {
        let deadline = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(what, e)),
            Err(_) => Err(StoreError::unavailable(format!(
                "{what} timed out after {}ms",
                self.config.timeout_ms
            ))),
        }
    }
}

/// Transport failures mean the log is unreachable; everything else is a
/// query problem.
fn classify(what: &str, e: clickhouse::error::Error) -> StoreError {
    match e {
        clickhouse::error::Error::Network(_) => StoreError::unavailable(format!("{what}: {e}")),
        other => StoreError::query(format!("{what}: {other}")),
    }
}
