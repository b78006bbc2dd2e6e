//! ClickHouse health checks.

use async_trait::async_trait;
use sync_core::{BackendProbe, StoreResult};
use tracing::{debug, error};

use crate::client::ClickHouseClient;

/// Check ClickHouse connection health.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.probe().await {
        Ok(()) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Err(e) => {
            error!("ClickHouse health check failed: {}", e);
            false
        }
    }
}

#[async_trait]
impl BackendProbe for ClickHouseClient {
    async fn probe(&self) -> StoreResult<()> {
        self.timed("probe", self.inner().query("SELECT 1").fetch_one::<u8>())
            .await
            .map(|_| ())
    }
}
