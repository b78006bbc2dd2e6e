//! ClickHouse storage for the rate limiter.
//!
//! Provides the durable attempt log and the security audit log behind the
//! `RateLimitStore` and `AuditSink` ports.

pub mod client;
pub mod config;
pub mod health;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use health::check_connection;
pub use schema::init_schema;
pub use store::ClickHouseStore;
