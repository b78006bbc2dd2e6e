//! Advisory connection status.
//!
//! Combines the platform online flag, a timed backend probe, and the
//! multiplexer's channel state into a [`ConnectionStatus`] for display. The
//! status is never consulted for correctness decisions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sync_core::{BackendProbe, StoreError, StoreResult};
use telemetry::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::multiplexer::Multiplexer;

/// Round-trip classification of the last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Fast,
    Slow,
    Unknown,
}

impl LatencyClass {
    pub fn classify(latency: Duration, slow_threshold: Duration) -> Self {
        if latency < slow_threshold {
            Self::Fast
        } else {
            Self::Slow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub online: bool,
    pub backend_reachable: bool,
    pub latency: LatencyClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub realtime_connected: bool,
    pub channel_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            online: true,
            backend_reachable: false,
            latency: LatencyClass::Unknown,
            latency_ms: None,
            realtime_connected: false,
            channel_count: 0,
            checked_at: None,
        }
    }
}

pub struct ConnectionMonitor {
    probe: Arc<dyn BackendProbe>,
    multiplexer: Multiplexer,
    config: MonitorConfig,
    online: AtomicBool,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new(
        probe: Arc<dyn BackendProbe>,
        multiplexer: Multiplexer,
        config: MonitorConfig,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            probe,
            multiplexer,
            config,
            online: AtomicBool::new(true),
            status,
        }
    }

    /// Recompute the status now.
    pub async fn refresh(&self) -> ConnectionStatus {
        let online = self.online.load(Ordering::Acquire);

        let (backend_reachable, latency, latency_ms) = if online {
            let started = Instant::now();
            match self.probe.probe().await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    let ms = elapsed.as_millis() as u64;
                    metrics().probe_latency_ms.observe(ms);
                    (
                        true,
                        LatencyClass::classify(elapsed, self.config.slow_threshold()),
                        Some(ms),
                    )
                }
                Err(e) => {
                    debug!(error = %e, "Backend probe failed");
                    metrics().probe_failures.inc();
                    (false, LatencyClass::Unknown, None)
                }
            }
        } else {
            (false, LatencyClass::Unknown, None)
        };

        let mux = self.multiplexer.status();
        let next = ConnectionStatus {
            online,
            backend_reachable,
            latency,
            latency_ms,
            realtime_connected: mux.connected,
            channel_count: mux.channel_count,
            checked_at: Some(Utc::now()),
        };

        let previous = self.status.send_replace(next.clone());
        if previous.backend_reachable != next.backend_reachable
            || previous.online != next.online
            || previous.latency != next.latency
        {
            info!(
                online = next.online,
                reachable = next.backend_reachable,
                latency = ?next.latency,
                channels = next.channel_count,
                "Connection status changed"
            );
        }
        next
    }

    /// Record a platform online/offline transition and refresh.
    pub async fn set_online(&self, online: bool) -> ConnectionStatus {
        let was = self.online.swap(online, Ordering::AcqRel);
        if was != online {
            debug!(online, "Platform connectivity changed");
        }
        self.refresh().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Refresh immediately and then on every interval tick until the
    /// monitor is dropped or the task aborted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.refresh().await;
            }
        })
    }
}

/// Probes an HTTP endpoint; any 2xx response counts as reachable.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> StoreResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(StoreError::query("probe url cannot be empty"));
        }

        Ok(Self {
            url,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| StoreError::query(e.to_string()))?,
        })
    }
}

#[async_trait]
impl BackendProbe for HttpProbe {
    async fn probe(&self) -> StoreResult<()> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::unavailable(format!("probe to {} timed out", self.url))
            } else {
                StoreError::unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!("probe returned {status}")))
        }
    }
}
