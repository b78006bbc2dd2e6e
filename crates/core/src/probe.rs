//! Backend reachability probe port.

use async_trait::async_trait;

use crate::store::StoreResult;

/// A lightweight round trip to the backend, used for advisory health only.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn probe(&self) -> StoreResult<()>;
}
