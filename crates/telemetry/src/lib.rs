//! Telemetry for the pharmacy sync service.
//!
//! Structured logging via `tracing`, in-process counters, and a component
//! health registry read by the HTTP health endpoints.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
