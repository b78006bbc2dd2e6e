//! Sliding-window rate limiting over a durable attempt log.
//!
//! The limiter counts attempts for an `(action, identifier)` pair inside a
//! rolling window, appends one log record per allowed attempt, audits
//! denials, and fails open when the log is unreachable.

pub mod limiter;
pub mod memory;

pub use limiter::*;
pub use memory::{MemoryAuditLog, MemoryStore};
