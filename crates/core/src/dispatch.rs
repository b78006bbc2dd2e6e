//! Guarded invocation of consumer callbacks.
//!
//! Consumer callbacks may fail or panic. Both are contained at the dispatch
//! boundary and logged so fan-out to the remaining consumers continues.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::error::{CallbackError, ErrorCode};

/// Result type returned by consumer callbacks.
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Runs `f`, containing any error or panic it produces.
///
/// Returns `true` when the callback completed successfully.
pub fn invoke_guarded<F>(consumer: &str, f: F) -> bool
where
    F: FnOnce() -> CallbackResult,
{
    let error = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return true,
        Ok(Err(e)) => e,
        Err(payload) => CallbackError::from_panic(payload),
    };

    warn!(
        consumer = %consumer,
        code = ErrorCode::Callback.code(),
        error = %error,
        "Consumer callback failed"
    );
    false
}
