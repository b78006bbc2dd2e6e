//! In-process change feed.
//!
//! `LocalBroker` implements [`RealtimeTransport`] without a network. Writers
//! publish row changes; every open channel whose bindings match receives
//! them. Failures can be scripted for exercising reconnect behavior.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sync_core::ChannelError;
use tokio::sync::watch;
use tracing::debug;

use crate::transport::{
    Binding, BindingHandler, ChangeNotification, ChannelSpec, ChannelStatus, LiveChannel,
    RealtimeTransport,
};

/// Parsed `column=op.value` row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
}

impl RowFilter {
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        let invalid = || ChannelError::Errored(format!("invalid filter: {raw}"));

        let (column, rest) = raw.split_once('=').ok_or_else(invalid)?;
        let (op, value) = rest.split_once('.').ok_or_else(invalid)?;
        let op = match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            _ => return Err(ChannelError::Errored(format!("unsupported filter operator: {op}"))),
        };
        if column.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            column: column.to_string(),
            op,
            value: value.to_string(),
        })
    }

    pub fn matches(&self, row: Option<&Value>) -> bool {
        let equal = match row.and_then(|r| r.get(&self.column)) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        };
        match self.op {
            FilterOp::Eq => equal,
            FilterOp::Neq => !equal,
        }
    }
}

struct BrokerChannel {
    name: String,
    bindings: Vec<(Binding, Option<RowFilter>)>,
    handler: BindingHandler,
    status: watch::Sender<ChannelStatus>,
}

#[derive(Default)]
struct BrokerInner {
    channels: Mutex<HashMap<u64, BrokerChannel>>,
    scripted_failures: Mutex<VecDeque<ChannelError>>,
    next_id: AtomicU64,
    subscribe_calls: AtomicUsize,
}

/// In-process realtime transport.
#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `errors.len()` subscribe calls fail with these errors, in order.
    pub fn fail_next_subscribes(&self, errors: impl IntoIterator<Item = ChannelError>) {
        self.inner.scripted_failures.lock().extend(errors);
    }

    /// Deliver a change to every matching binding. Returns the number of
    /// bindings that received it.
    pub fn publish(&self, notification: ChangeNotification) -> usize {
        let n = &notification;
        let targets: Vec<(BindingHandler, usize)> = {
            let channels = self.inner.channels.lock();
            channels
                .values()
                .flat_map(|channel| {
                    channel
                        .bindings
                        .iter()
                        .enumerate()
                        .filter(move |(_, (binding, filter))| {
                            binding.table == n.table
                                && binding.event == n.event
                                && filter.as_ref().map_or(true, |f| f.matches(n.row()))
                        })
                        .map(move |(index, _)| (channel.handler.clone(), index))
                })
                .collect()
        };

        for (handler, index) in &targets {
            handler(*index, notification.clone());
        }
        targets.len()
    }

    /// Fail every open channel with `error` and forget it.
    pub fn drop_channels(&self, error: ChannelError) {
        let dropped: Vec<BrokerChannel> =
            self.inner.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in dropped {
            debug!(channel = %channel.name, "Dropping broker channel");
            channel.status.send_replace(ChannelStatus::Failed(error.clone()));
        }
    }

    pub fn open_channels(&self) -> usize {
        self.inner.channels.lock().len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.inner.channels.lock().values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    /// Total subscribe attempts, including failed ones.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::Relaxed)
    }
}

struct LocalChannel {
    id: u64,
    broker: Weak<BrokerInner>,
    status: watch::Receiver<ChannelStatus>,
}

impl LiveChannel for LocalChannel {
    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    fn close(&self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.channels.lock().remove(&self.id);
        }
    }
}

#[async_trait]
impl RealtimeTransport for LocalBroker {
    async fn subscribe(
        &self,
        spec: ChannelSpec,
        handler: BindingHandler,
    ) -> Result<Box<dyn LiveChannel>, ChannelError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.inner.scripted_failures.lock().pop_front() {
            return Err(error);
        }

        let bindings = spec
            .bindings
            .into_iter()
            .map(|binding| {
                let filter = binding.filter.as_deref().map(RowFilter::parse).transpose()?;
                Ok((binding, filter))
            })
            .collect::<Result<Vec<_>, ChannelError>>()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(ChannelStatus::Subscribed);

        self.inner.channels.lock().insert(
            id,
            BrokerChannel {
                name: spec.name,
                bindings,
                handler,
                status: tx,
            },
        );

        Ok(Box::new(LocalChannel {
            id,
            broker: Arc::downgrade(&self.inner),
            status: rx,
        }))
    }
}
