//! Application state shared across handlers.

use std::sync::Arc;

use ratelimit::RateLimiter;
use realtime::SyncHub;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Sliding-window limiter over the configured log store
    pub limiter: Arc<RateLimiter>,
    /// Session-scoped real-time services, reported on by `/health`
    pub hub: Arc<SyncHub>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, hub: Arc<SyncHub>) -> Self {
        Self { limiter, hub }
    }
}
