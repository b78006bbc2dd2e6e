//! Real-time synchronization for the pharmacy platform.
//!
//! - `multiplexer`: one shared live channel per feed key, throttled fan-out,
//!   reconnect with exponential backoff
//! - `propagator`: in-process and cross-tab delivery of domain events
//! - `monitor`: advisory connection status
//! - `broker`: in-process change feed implementing the channel transport

pub mod broker;
pub mod config;
pub mod hub;
pub mod monitor;
pub mod multiplexer;
pub mod propagator;
pub mod storage;
pub mod throttle;
pub mod transport;

pub use broker::LocalBroker;
pub use config::{MonitorConfig, PropagatorConfig, RealtimeConfig};
pub use hub::SyncHub;
pub use monitor::*;
pub use multiplexer::*;
pub use propagator::*;
pub use storage::*;
pub use throttle::Throttle;
pub use transport::*;
