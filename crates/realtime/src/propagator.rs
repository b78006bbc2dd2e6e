//! Domain event propagation within a tab and across tabs.
//!
//! `emit` delivers to in-process subscribers first, then broadcasts a
//! refresh notice, then writes the event to shared storage under its kind's
//! key. Other tabs observe that write and replay the event to their own
//! subscribers unless it is older than the staleness window.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sync_core::{
    invoke_guarded, to_chrono, CallbackResult, DomainEvent, RefreshNotice, SharedClock, SystemClock,
};
use telemetry::metrics;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::storage::{CrossTabStorage, StorageChange, StorageObserver, TabId};

pub type EventCallback<E> = Arc<dyn Fn(&E) -> CallbackResult + Send + Sync>;

const REFRESH_CAPACITY: usize = 64;

struct Listener<E> {
    id: u64,
    component: String,
    callback: EventCallback<E>,
}

struct Inner<E: DomainEvent> {
    tab: TabId,
    storage: Arc<dyn CrossTabStorage>,
    clock: SharedClock,
    staleness: Duration,
    listeners: Mutex<Vec<Listener<E>>>,
    storage_observers: Mutex<Vec<(u64, StorageObserver)>>,
    next_id: AtomicU64,
    last_stamp: AtomicI64,
    refresh: broadcast::Sender<RefreshNotice>,
}

/// Publishes and receives domain events for one tab.
pub struct EventPropagator<E: DomainEvent> {
    inner: Arc<Inner<E>>,
}

impl<E: DomainEvent> Clone for EventPropagator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: DomainEvent> EventPropagator<E> {
    pub fn new(storage: Arc<dyn CrossTabStorage>, staleness: Duration) -> Self {
        Self::with_clock(storage, staleness, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn CrossTabStorage>,
        staleness: Duration,
        clock: SharedClock,
    ) -> Self {
        let (refresh, _) = broadcast::channel(REFRESH_CAPACITY);
        let inner = Arc::new(Inner {
            tab: TabId::new(),
            storage,
            clock,
            staleness,
            listeners: Mutex::new(Vec::new()),
            storage_observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            last_stamp: AtomicI64::new(0),
            refresh,
        });

        let weak: Weak<Inner<E>> = Arc::downgrade(&inner);
        inner.storage.observe(
            inner.tab,
            Arc::new(move |change: &StorageChange| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_storage_change(change);
                }
            }),
        );

        Self { inner }
    }

    pub fn tab_id(&self) -> TabId {
        self.inner.tab
    }

    /// Register a callback for every event delivered to this tab.
    pub fn subscribe<F>(&self, component: impl Into<String>, callback: F) -> ListenerHandle<E>
    where
        F: Fn(&E) -> CallbackResult + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let component = component.into();
        debug!(tab = %self.inner.tab, component = %component, "Event listener added");
        self.inner.listeners.lock().push(Listener {
            id,
            component,
            callback: Arc::new(callback),
        });
        ListenerHandle {
            inner: Arc::downgrade(&self.inner),
            id,
            active: true,
        }
    }

    /// Observe raw storage changes seen by this tab, including its own writes.
    pub fn observe_storage<F>(&self, observer: F) -> StorageObserverHandle<E>
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.storage_observers.lock().push((id, Arc::new(observer)));
        StorageObserverHandle {
            inner: Arc::downgrade(&self.inner),
            id,
            active: true,
        }
    }

    pub fn refresh_notices(&self) -> broadcast::Receiver<RefreshNotice> {
        self.inner.refresh.subscribe()
    }

    /// Publish `event`. Returns the event as delivered, with its timestamp
    /// stamped by this tab.
    ///
    /// A failed storage write is logged and does not affect in-process
    /// delivery, which has already happened.
    pub fn emit(&self, event: E) -> E {
        let inner = &self.inner;
        let event = event.stamped(inner.next_timestamp());

        inner.deliver(&event);
        metrics().events_propagated.inc();
        // No receivers is not an error
        let _ = inner.refresh.send(event.refresh_notice());

        let key = event.storage_key();
        let raw = match event.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(tab = %inner.tab, key, error = %e, "Event encoding failed");
                metrics().storage_write_failures.inc();
                return event;
            }
        };

        let old_value = inner.storage.get_item(key).ok().flatten();
        if let Err(e) = inner.storage.set_item(inner.tab, key, raw.clone()) {
            warn!(tab = %inner.tab, key, error = %e, "Cross-tab storage write failed");
            metrics().storage_write_failures.inc();
            return event;
        }

        // Storage does not notify the writing tab; raise the change locally
        // so this tab's raw observers still see it.
        inner.on_storage_change(&StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(raw),
            origin: inner.tab,
        });

        event
    }

    /// Most recent event stored under `key`, if any.
    pub fn latest(&self, key: &str) -> sync_core::Result<Option<E>> {
        match self.inner.storage.get_item(key)? {
            Some(raw) => E::decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Stop observing storage and drop every listener.
    pub fn dispose(&self) {
        self.inner.storage.unobserve(self.inner.tab);
        self.inner.listeners.lock().clear();
        self.inner.storage_observers.lock().clear();
        debug!(tab = %self.inner.tab, "Event propagator disposed");
    }
}

impl<E: DomainEvent> Inner<E> {
    /// Epoch milliseconds, strictly increasing within this tab.
    fn next_timestamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let mut prev = self.last_stamp.load(Ordering::Acquire);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    fn deliver(&self, event: &E) {
        let listeners: Vec<(String, EventCallback<E>)> = self
            .listeners
            .lock()
            .iter()
            .map(|l| (l.component.clone(), l.callback.clone()))
            .collect();

        for (component, callback) in listeners {
            invoke_guarded(&component, || callback(event));
        }
    }

    fn on_storage_change(&self, change: &StorageChange) {
        let observers: Vec<StorageObserver> = self
            .storage_observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(change);
        }

        // Own writes were already delivered by `emit`
        if change.origin == self.tab || !E::storage_keys().contains(&change.key.as_str()) {
            return;
        }
        let Some(raw) = change.new_value.as_deref() else {
            return;
        };

        let event = match E::decode(&change.key, raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    tab = %self.tab,
                    key = %change.key,
                    error = %e,
                    "Ignoring malformed cross-tab event"
                );
                return;
            }
        };

        let age = self.clock.now_millis() - event.timestamp_millis();
        if age > to_chrono(self.staleness).num_milliseconds() {
            debug!(
                tab = %self.tab,
                key = %change.key,
                age_ms = age,
                "Skipping stale cross-tab event"
            );
            metrics().stale_replays_skipped.inc();
            return;
        }

        debug!(
            tab = %self.tab,
            key = %change.key,
            from = %change.origin,
            "Replaying cross-tab event"
        );
        self.deliver(&event);
    }
}

/// Registration of one event listener. Dropping it removes only that listener.
#[must_use = "dropping a ListenerHandle removes the listener immediately"]
pub struct ListenerHandle<E: DomainEvent> {
    inner: Weak<Inner<E>>,
    id: u64,
    active: bool,
}

impl<E: DomainEvent> ListenerHandle<E> {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().retain(|l| l.id != self.id);
        }
    }
}

impl<E: DomainEvent> Drop for ListenerHandle<E> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Registration of one raw storage observer.
#[must_use = "dropping a StorageObserverHandle removes the observer immediately"]
pub struct StorageObserverHandle<E: DomainEvent> {
    inner: Weak<Inner<E>>,
    id: u64,
    active: bool,
}

impl<E: DomainEvent> StorageObserverHandle<E> {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.storage_observers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl<E: DomainEvent> Drop for StorageObserverHandle<E> {
    fn drop(&mut self) {
        self.release();
    }
}
