//! In-process metrics for the sync service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that can go up or down.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram with fixed millisecond buckets.
#[derive(Debug, Default)]
pub struct Histogram {
    buckets: [AtomicU64; 8],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Upper bounds; the last bucket also collects everything above it.
    const BOUNDS_MS: [u64; 8] = [5, 25, 100, 250, 500, 1000, 2000, 5000];

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BOUNDS_MS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum.load(Ordering::Relaxed) as f64 / n as f64,
        }
    }

    /// (upper bound, count) pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BOUNDS_MS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, c)| (bound, c.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the sync service.
#[derive(Debug, Default)]
pub struct Metrics {
    // Rate limiter
    pub rate_limit_checks: Counter,
    pub rate_limit_allowed: Counter,
    pub rate_limit_denied: Counter,
    pub rate_limit_fail_open: Counter,
    pub rate_limit_gc_sweeps: Counter,
    pub rate_limit_check_latency_ms: Histogram,

    // Realtime multiplexer
    pub channels_opened: Counter,
    pub channels_closed: Counter,
    pub channel_reconnects: Counter,
    pub channel_failures: Counter,
    pub deliveries: Counter,
    pub callback_failures: Counter,
    pub open_channels: Gauge,

    // Propagator
    pub events_propagated: Counter,
    pub stale_replays_skipped: Counter,
    pub storage_write_failures: Counter,

    // Connection monitor
    pub probe_latency_ms: Histogram,
    pub probe_failures: Counter,
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub rate_limit_checks: u64,
    pub rate_limit_allowed: u64,
    pub rate_limit_denied: u64,
    pub rate_limit_fail_open: u64,
    pub rate_limit_check_latency_mean_ms: f64,
    pub channels_opened: u64,
    pub channel_reconnects: u64,
    pub open_channels: u64,
    pub deliveries: u64,
    pub callback_failures: u64,
    pub events_propagated: u64,
    pub probe_latency_mean_ms: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            rate_limit_checks: self.rate_limit_checks.get(),
            rate_limit_allowed: self.rate_limit_allowed.get(),
            rate_limit_denied: self.rate_limit_denied.get(),
            rate_limit_fail_open: self.rate_limit_fail_open.get(),
            rate_limit_check_latency_mean_ms: self.rate_limit_check_latency_ms.mean(),
            channels_opened: self.channels_opened.get(),
            channel_reconnects: self.channel_reconnects.get(),
            open_channels: self.open_channels.get(),
            deliveries: self.deliveries.get(),
            callback_failures: self.callback_failures.get(),
            events_propagated: self.events_propagated.get(),
            probe_latency_mean_ms: self.probe_latency_ms.mean(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
