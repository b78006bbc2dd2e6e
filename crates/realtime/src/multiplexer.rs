//! Shared live channels.
//!
//! Every distinct `(channel name, owner)` pair maps to exactly one underlying
//! channel. Additional subscribers with the same key share it through a
//! reference count; the channel is torn down when the count reaches zero.
//! Deliveries are throttled per callback and failed channels are reopened
//! with exponential backoff.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sync_core::{invoke_guarded, CallbackResult, ChannelError, ErrorCode};
use telemetry::{health, metrics};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RealtimeConfig;
use crate::throttle::Throttle;
use crate::transport::{
    Binding, BindingHandler, ChangeEvent, ChangeNotification, ChannelSpec, ChannelStatus,
    LiveChannel, RealtimeTransport,
};

/// Consumer callback for row changes on one table.
pub type ChangeCallback = Arc<dyn Fn(&ChangeNotification) -> CallbackResult + Send + Sync>;

/// One table listener requested by a subscriber.
#[derive(Clone)]
pub struct TableConfig {
    pub table: String,
    pub filter: Option<String>,
    pub events: Vec<ChangeEvent>,
    pub callback: ChangeCallback,
}

impl TableConfig {
    /// Listen to every event kind on `table`.
    pub fn new<F>(table: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&ChangeNotification) -> CallbackResult + Send + Sync + 'static,
    {
        Self {
            table: table.into(),
            filter: None,
            events: ChangeEvent::ALL.to_vec(),
            callback: Arc::new(callback),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        self.events = events.into_iter().collect();
        self
    }
}

impl fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("table", &self.table)
            .field("filter", &self.filter)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

pub fn channel_key(channel_name: &str, owner_id: &str) -> String {
    format!("{channel_name}:{owner_id}")
}

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub key: String,
    pub ref_count: usize,
    pub retry_count: u32,
    pub connected: bool,
}

/// Aggregate connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexerStatus {
    /// At least one channel exists and every channel is subscribed
    pub connected: bool,
    pub channel_count: usize,
}

/// Per-channel fan-out: one throttle per table config, and the config that
/// owns each binding.
struct Dispatch {
    throttles: Vec<Throttle<ChangeNotification>>,
    binding_owner: Vec<usize>,
    bindings: Vec<Binding>,
}

impl Dispatch {
    fn build(key: &str, configs: &[TableConfig], window: Duration) -> Self {
        let mut throttles = Vec::with_capacity(configs.len());
        let mut binding_owner = Vec::new();
        let mut bindings = Vec::new();

        for (index, config) in configs.iter().enumerate() {
            let callback = config.callback.clone();
            let consumer = format!("{key}/{}", config.table);
            throttles.push(Throttle::new(window, move |notification: ChangeNotification| {
                metrics().deliveries.inc();
                if !invoke_guarded(&consumer, || callback(&notification)) {
                    metrics().callback_failures.inc();
                }
            }));

            let mut events = config.events.clone();
            events.dedup();
            for event in events {
                bindings.push(Binding {
                    table: config.table.clone(),
                    event,
                    filter: config.filter.clone(),
                });
                binding_owner.push(index);
            }
        }

        Self {
            throttles,
            binding_owner,
            bindings,
        }
    }

    fn handler(self: &Arc<Self>) -> BindingHandler {
        let dispatch = self.clone();
        Arc::new(move |binding, notification| {
            if let Some(throttle) = dispatch
                .binding_owner
                .get(binding)
                .and_then(|&owner| dispatch.throttles.get(owner))
            {
                throttle.call(notification);
            }
        })
    }
}

struct ChannelEntry {
    ref_count: usize,
    retry_count: u32,
    connected: bool,
    /// Bumped whenever the channel is reopened so stale tasks stand down
    generation: u64,
    dispatch: Arc<Dispatch>,
    channel: Option<Box<dyn LiveChannel>>,
    /// Pending connect, reconnect timer, or status watcher
    task: Option<JoinHandle<()>>,
}

impl ChannelEntry {
    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        for throttle in &self.dispatch.throttles {
            throttle.cancel();
        }
    }
}

struct Inner {
    transport: Arc<dyn RealtimeTransport>,
    config: RealtimeConfig,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    status: watch::Sender<MultiplexerStatus>,
    disposed: AtomicBool,
}

/// Registry of shared live channels.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn RealtimeTransport>, config: RealtimeConfig) -> Self {
        let (status, _) = watch::channel(MultiplexerStatus::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                channels: Mutex::new(HashMap::new()),
                status,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Share or open the channel for `(channel_name, owner_id)`.
    ///
    /// When the key already exists only its reference count changes; the
    /// table configs of later subscribers are not merged in. Must be called
    /// from within a tokio runtime.
    pub fn subscribe(
        &self,
        channel_name: &str,
        configs: Vec<TableConfig>,
        owner_id: &str,
    ) -> Subscription {
        let key = channel_key(channel_name, owner_id);

        if self.inner.disposed.load(Ordering::Acquire) {
            warn!(channel = %key, "Subscribe after dispose ignored");
            return Subscription::inert(key);
        }

        {
            let mut channels = self.inner.channels.lock();
            if let Some(entry) = channels.get_mut(&key) {
                entry.ref_count += 1;
                debug!(channel = %key, ref_count = entry.ref_count, "Sharing existing channel");
                return Subscription::new(&self.inner, key);
            }

            let window = self.inner.config.throttle_window();
            let dispatch = Arc::new(Dispatch::build(&key, &configs, window));
            let task = self.inner.spawn_connect(key.clone(), 0, None);
            channels.insert(
                key.clone(),
                ChannelEntry {
                    ref_count: 1,
                    retry_count: 0,
                    connected: false,
                    generation: 0,
                    dispatch,
                    channel: None,
                    task: Some(task),
                },
            );
        }

        info!(channel = %key, tables = configs.len(), "Opening channel");
        self.inner.publish_status();
        Subscription::new(&self.inner, key)
    }

    /// Reopen one channel immediately with a fresh retry budget.
    pub fn force_reconnect(&self, key: &str) -> bool {
        self.inner.force_reconnect(key)
    }

    /// Reopen every channel, e.g. after the network comes back.
    pub fn reconnect_all(&self) {
        let keys: Vec<String> = self.inner.channels.lock().keys().cloned().collect();
        for key in keys {
            self.inner.force_reconnect(&key);
        }
    }

    /// Tear down every channel and cancel pending timers.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        let entries: Vec<ChannelEntry> =
            self.inner.channels.lock().drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for mut entry in entries {
            entry.shutdown();
            metrics().channels_closed.inc();
        }
        info!(channels = count, "Multiplexer disposed");
        self.inner.publish_status();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().connected
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    pub fn channel_info(&self, key: &str) -> Option<ChannelInfo> {
        self.inner.channels.lock().get(key).map(|entry| ChannelInfo {
            key: key.to_string(),
            ref_count: entry.ref_count,
            retry_count: entry.retry_count,
            connected: entry.connected,
        })
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self
            .inner
            .channels
            .lock()
            .iter()
            .map(|(key, entry)| ChannelInfo {
                key: key.clone(),
                ref_count: entry.ref_count,
                retry_count: entry.retry_count,
                connected: entry.connected,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn status(&self) -> MultiplexerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<MultiplexerStatus> {
        self.inner.status.subscribe()
    }
}

impl Inner {
    fn spawn_connect(
        self: &Arc<Self>,
        key: String,
        generation: u64,
        delay: Option<Duration>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                metrics().channel_reconnects.inc();
            }
            if let Some(inner) = weak.upgrade() {
                inner.connect(&key, generation).await;
            }
        })
    }

    async fn connect(self: Arc<Self>, key: &str, generation: u64) {
        let request = {
            let channels = self.channels.lock();
            match channels.get(key) {
                Some(entry) if entry.generation == generation => {
                    let spec = ChannelSpec {
                        name: key.to_string(),
                        bindings: entry.dispatch.bindings.clone(),
                    };
                    Some((spec, entry.dispatch.handler()))
                }
                _ => None,
            }
        };
        let Some((spec, handler)) = request else {
            return;
        };

        let result = self.transport.subscribe(spec, handler).await;
        self.finish_connect(key, generation, result);
    }

    fn finish_connect(
        self: &Arc<Self>,
        key: &str,
        generation: u64,
        result: Result<Box<dyn LiveChannel>, ChannelError>,
    ) {
        let mut channels = self.channels.lock();

        let stale = channels.get(key).map_or(true, |e| e.generation != generation);
        if stale {
            drop(channels);
            if let Ok(channel) = result {
                channel.close();
            }
            return;
        }

        match result {
            Ok(channel) => {
                let status = channel.status();
                if let Some(entry) = channels.get_mut(key) {
                    entry.connected = true;
                    entry.retry_count = 0;
                    entry.channel = Some(channel);
                    let owner = Arc::downgrade(self);
                    entry.task = Some(spawn_watch(owner, key.to_string(), generation, status));
                }
                drop(channels);

                info!(channel = %key, "Channel subscribed");
                metrics().channels_opened.inc();
                health().realtime.set_healthy();
                self.publish_status();
            }
            Err(error) => {
                drop(channels);
                self.handle_failure(key, generation, error);
            }
        }
    }

    fn handle_failure(self: &Arc<Self>, key: &str, generation: u64, error: ChannelError) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let stale_channel = {
            let mut channels = self.channels.lock();
            let Some(entry) = channels.get_mut(key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }

            entry.connected = false;
            metrics().channel_failures.inc();

            if entry.retry_count >= self.config.max_reconnect_attempts {
                entry.task = None;
                error!(
                    channel = %key,
                    code = ErrorCode::Channel.code(),
                    attempts = entry.retry_count,
                    error = %error,
                    "Channel failed, giving up on reconnect"
                );
                health().realtime.set_unhealthy(format!("{key}: {error}"));
            } else {
                let delay = self.config.reconnect_delay(entry.retry_count);
                entry.retry_count += 1;
                entry.generation += 1;
                warn!(
                    channel = %key,
                    code = ErrorCode::Channel.code(),
                    attempt = entry.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Channel failed, scheduling reconnect"
                );
                let next = entry.generation;
                entry.task = Some(self.spawn_connect(key.to_string(), next, Some(delay)));
            }

            entry.channel.take()
        };

        if let Some(channel) = stale_channel {
            channel.close();
        }
        self.publish_status();
    }

    fn force_reconnect(self: &Arc<Self>, key: &str) -> bool {
        let stale_channel = {
            let mut channels = self.channels.lock();
            let Some(entry) = channels.get_mut(key) else {
                return false;
            };

            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.connected = false;
            entry.retry_count = 0;
            entry.generation += 1;
            entry.task = Some(self.spawn_connect(key.to_string(), entry.generation, None));
            entry.channel.take()
        };

        if let Some(channel) = stale_channel {
            channel.close();
        }
        info!(channel = %key, "Forcing channel reconnect");
        self.publish_status();
        true
    }

    fn release(&self, key: &str) {
        let removed = {
            let mut channels = self.channels.lock();
            let Some(entry) = channels.get_mut(key) else {
                return;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count > 0 {
                debug!(channel = %key, ref_count = entry.ref_count, "Released shared channel");
                return;
            }
            channels.remove(key)
        };

        if let Some(mut entry) = removed {
            entry.shutdown();
            metrics().channels_closed.inc();
            info!(channel = %key, "Channel torn down");
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = {
            let channels = self.channels.lock();
            MultiplexerStatus {
                connected: !channels.is_empty() && channels.values().all(|e| e.connected),
                channel_count: channels.len(),
            }
        };
        metrics().open_channels.set(status.channel_count as u64);
        self.status.send_replace(status);
    }
}

fn spawn_watch(
    weak: Weak<Inner>,
    key: String,
    generation: u64,
    mut status: watch::Receiver<ChannelStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let error = loop {
            if status.changed().await.is_err() {
                break ChannelError::Closed;
            }
            let current = status.borrow_and_update().clone();
            if let ChannelStatus::Failed(error) = current {
                break error;
            }
        };

        if let Some(inner) = weak.upgrade() {
            inner.handle_failure(&key, generation, error);
        }
    })
}

/// Handle for one reference to a shared channel. Dropping it releases the
/// reference.
#[must_use = "dropping a Subscription releases it immediately"]
pub struct Subscription {
    inner: Weak<Inner>,
    key: String,
    active: bool,
}

impl Subscription {
    fn new(inner: &Arc<Inner>, key: String) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            key,
            active: true,
        }
    }

    fn inert(key: String) -> Self {
        Self {
            inner: Weak::new(),
            key,
            active: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.release(&self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}
