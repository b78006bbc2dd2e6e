//! Throttle with trailing coalesce-to-latest.
//!
//! The first call in a quiet period fires immediately and opens a window.
//! Calls inside the window replace one pending value, which fires once when
//! the window closes. Bursts therefore produce at most two deliveries per
//! window and the last value is never lost.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Sink<T> = Box<dyn Fn(T) + Send + Sync>;

struct State<T> {
    last_fired: Option<Instant>,
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<T> {
    window: Duration,
    sink: Sink<T>,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn flush_pending(&self) {
        let value = {
            let mut state = self.state.lock();
            state.timer = None;
            let value = state.pending.take();
            if value.is_some() {
                state.last_fired = Some(Instant::now());
            }
            value
        };

        if let Some(value) = value {
            (self.sink)(value);
        }
    }
}

/// Rate-limits calls to a sink to one per window plus one trailing call.
pub struct Throttle<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Throttle<T> {
    pub fn new(window: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                window,
                sink: Box::new(sink),
                state: Mutex::new(State {
                    last_fired: None,
                    pending: None,
                    timer: None,
                }),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Deliver `value` now, or coalesce it into the trailing call.
    ///
    /// Outside a tokio runtime there is no timer to schedule, so values are
    /// delivered immediately.
    pub fn call(&self, value: T) {
        let now = Instant::now();
        let mut state = self.shared.state.lock();

        let in_window = state
            .last_fired
            .map(|at| now.duration_since(at) < self.shared.window)
            .unwrap_or(false);

        if !in_window {
            // A trailing value whose timer has not run yet is superseded
            state.last_fired = Some(now);
            state.pending = None;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            drop(state);
            (self.shared.sink)(value);
            return;
        }

        state.pending = Some(value);
        if state.timer.is_some() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            let value = state.pending.take();
            state.last_fired = Some(now);
            drop(state);
            if let Some(value) = value {
                (self.shared.sink)(value);
            }
            return;
        };

        let fire_at = state.last_fired.unwrap_or(now) + self.shared.window;
        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            if let Some(shared) = shared.upgrade() {
                shared.flush_pending();
            }
        }));
    }

    /// Whether a trailing call is waiting to fire.
    pub fn has_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Drop any pending trailing call.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl<T: Send + 'static> Drop for Throttle<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
