//! Pharmacy sync service
//!
//! Hosts the sliding-window rate limiter endpoint and one sync hub:
//! - `POST /rate-limit` checks and records attempts against the durable log
//! - shared live channels with throttled fan-out and reconnect backoff
//! - bill events propagated in-process and across tabs
//! - advisory connection monitoring on `/health`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use clickhouse_client::{
    check_connection, init_schema, ClickHouseClient, ClickHouseConfig, ClickHouseStore,
};
use ratelimit::{MemoryAuditLog, MemoryStore, RateLimitSettings, RateLimiter};
use realtime::{
    HttpProbe, LocalBroker, MemoryStorage, MonitorConfig, PropagatorConfig, RealtimeConfig, SyncHub,
};
use sync_core::{AuditSink, BackendProbe, RateLimitStore};
use telemetry::{health, init_tracing_from_env};

/// Which attempt log backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreKind {
    Memory,
    Clickhouse,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_store")]
    store: StoreKind,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    rate_limit: RateLimitSettings,

    #[serde(default)]
    realtime: RealtimeConfig,

    #[serde(default)]
    propagator: PropagatorConfig,

    #[serde(default)]
    monitor: MonitorConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_store() -> StoreKind {
    StoreKind::Memory
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: default_store(),
            clickhouse: ClickHouseConfig::default(),
            rate_limit: RateLimitSettings::default(),
            realtime: RealtimeConfig::default(),
            propagator: PropagatorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

type Backends = (Arc<dyn RateLimitStore>, Arc<dyn AuditSink>, Arc<dyn BackendProbe>);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing_from_env();

    info!("Starting pharmacy sync service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(store = ?config.store, host = %config.host, port = config.port, "Loaded configuration");

    let (store, audit, store_probe) = build_backends(&config).await;

    let probe: Arc<dyn BackendProbe> = match config.monitor.probe_url.as_deref() {
        Some(url) => Arc::new(
            HttpProbe::new(url, Duration::from_millis(config.monitor.probe_timeout_ms))
                .context("Failed to create HTTP probe")?,
        ),
        None => store_probe,
    };

    let limiter = Arc::new(
        RateLimiter::new(store, audit, &config.rate_limit)
            .context("Invalid rate limit policy overrides")?,
    );

    let broker = LocalBroker::new();
    let hub = Arc::new(SyncHub::new(
        Arc::new(broker),
        Arc::new(MemoryStorage::new()),
        probe,
        config.realtime.clone(),
        &config.propagator,
        config.monitor.clone(),
    ));
    hub.start();
    let bill_feed = hub.bridge_bill_feed("server");

    let app = router(AppState::new(limiter, hub.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    bill_feed.unsubscribe();
    hub.dispose();

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PHARMACY_SYNC")
                .prefix_separator("_")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Select the attempt log and report its health.
async fn build_backends(config: &Config) -> Backends {
    match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory rate limit log; attempts are lost on restart");
            let store = Arc::new(MemoryStore::new());
            let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());
            health().log_store.set_healthy();
            (store.clone() as Arc<dyn RateLimitStore>, audit, store as Arc<dyn BackendProbe>)
        }
        StoreKind::Clickhouse => {
            let client = ClickHouseClient::new(config.clickhouse.clone());

            if let Err(e) = init_schema(&client).await {
                // The limiter fails open until the log is reachable
                error!("Failed to initialize ClickHouse schema: {}", e);
            }

            if check_connection(&client).await {
                health().log_store.set_healthy();
                info!("ClickHouse connection: healthy");
            } else {
                health().log_store.set_unhealthy("Connection failed");
                error!("ClickHouse connection: unhealthy");
            }

            let store = Arc::new(ClickHouseStore::new(client.clone()));
            (
                store.clone() as Arc<dyn RateLimitStore>,
                store as Arc<dyn AuditSink>,
                Arc::new(client) as Arc<dyn BackendProbe>,
            )
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
