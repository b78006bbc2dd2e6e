//! Change-feed transport abstraction.
//!
//! A transport opens named channels carrying row-level change notifications
//! for a set of table bindings. The multiplexer is written against this trait
//! so the hosted feed and the in-process broker are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::ChannelError;
use tokio::sync::watch;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl ChangeEvent {
    pub const ALL: [ChangeEvent; 3] =
        [ChangeEvent::Insert, ChangeEvent::Update, ChangeEvent::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEvent::Insert => "INSERT",
            ChangeEvent::Update => "UPDATE",
            ChangeEvent::Delete => "DELETE",
        }
    }
}

/// A single row change delivered on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub table: String,
    pub event: ChangeEvent,
    /// Row after the change; absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row before the change; absent for inserts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            event: ChangeEvent::Insert,
            new: Some(row),
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn update(table: impl Into<String>, old: Value, new: Value) -> Self {
        Self {
            table: table.into(),
            event: ChangeEvent::Update,
            new: Some(new),
            old: Some(old),
            commit_timestamp: Utc::now(),
        }
    }

    pub fn delete(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            event: ChangeEvent::Delete,
            new: None,
            old: Some(row),
            commit_timestamp: Utc::now(),
        }
    }

    /// The row a filter is evaluated against: `new`, falling back to `old`.
    pub fn row(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// One (table, event, filter) listener registered on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub table: String,
    pub event: ChangeEvent,
    /// Row filter in `column=op.value` form
    pub filter: Option<String>,
}

/// What to open: a channel name plus its bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub bindings: Vec<Binding>,
}

/// Receives notifications along with the index of the binding that matched.
pub type BindingHandler = Arc<dyn Fn(usize, ChangeNotification) + Send + Sync>;

/// Lifecycle of an opened channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    /// The channel dropped after subscribing
    Failed(ChannelError),
}

/// Handle to an open channel.
pub trait LiveChannel: Send + Sync {
    /// Status updates after a successful subscribe. The sender is dropped
    /// when the channel closes.
    fn status(&self) -> watch::Receiver<ChannelStatus>;

    fn close(&self);
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Open a channel and wait for the subscribe outcome.
    async fn subscribe(
        &self,
        spec: ChannelSpec,
        handler: BindingHandler,
    ) -> Result<Box<dyn LiveChannel>, ChannelError>;
}
