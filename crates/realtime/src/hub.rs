//! Session-scoped bundle of the real-time services.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sync_core::{BackendProbe, BillEvent, BillEventKind, RecordId};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{MonitorConfig, PropagatorConfig, RealtimeConfig};
use crate::monitor::ConnectionMonitor;
use crate::multiplexer::{Multiplexer, Subscription, TableConfig};
use crate::propagator::EventPropagator;
use crate::storage::CrossTabStorage;
use crate::transport::{ChangeEvent, ChangeNotification, RealtimeTransport};

/// Channel name for the bill change feed.
pub const BILLS_FEED: &str = "bills-feed";

/// One multiplexer, one bill-event propagator, and one connection monitor,
/// created at session start and disposed at session end.
pub struct SyncHub {
    multiplexer: Multiplexer,
    bills: EventPropagator<BillEvent>,
    monitor: Arc<ConnectionMonitor>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncHub {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        storage: Arc<dyn CrossTabStorage>,
        probe: Arc<dyn BackendProbe>,
        realtime: RealtimeConfig,
        propagator: &PropagatorConfig,
        monitor: MonitorConfig,
    ) -> Self {
        let multiplexer = Multiplexer::new(transport, realtime);
        let bills = EventPropagator::new(storage, propagator.staleness());
        let monitor = Arc::new(ConnectionMonitor::new(probe, multiplexer.clone(), monitor));

        Self {
            multiplexer,
            bills,
            monitor,
            monitor_task: Mutex::new(None),
        }
    }

    /// Start the periodic monitor refresh. Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = self.monitor_task.lock();
        if task.is_none() {
            *task = Some(self.monitor.start());
            info!(tab = %self.bills.tab_id(), "Sync hub started");
        }
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub fn bills(&self) -> &EventPropagator<BillEvent> {
        &self.bills
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Re-publish row changes on the `bills` table as bill events.
    pub fn bridge_bill_feed(&self, owner_id: &str) -> Subscription {
        let bills = self.bills.clone();
        let config = TableConfig::new("bills", move |change| {
            match bill_event_from_change(change) {
                Some(event) => {
                    bills.emit(event);
                }
                None => debug!(event = change.event.as_str(), "Bill change without id or number"),
            }
            Ok(())
        });
        self.multiplexer.subscribe(BILLS_FEED, vec![config], owner_id)
    }

    /// Stop the monitor and tear down every channel and listener.
    pub fn dispose(&self) {
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        self.multiplexer.dispose();
        self.bills.dispose();
        info!("Sync hub disposed");
    }
}

/// Map a `bills` row change onto the matching bill event.
pub fn bill_event_from_change(change: &ChangeNotification) -> Option<BillEvent> {
    let row = change.row()?;
    let kind = match change.event {
        ChangeEvent::Insert => BillEventKind::Generated,
        ChangeEvent::Update => BillEventKind::Updated,
        ChangeEvent::Delete => BillEventKind::Deleted,
    };

    let bill_id = record_id(row.get("id")?)?;
    let bill_number = row.get("bill_number")?.as_str()?;
    let mut event = BillEvent::new(kind, bill_id, bill_number);
    if let Some(prescription_id) = row.get("prescription_id").and_then(record_id) {
        event = event.with_prescription(prescription_id);
    }
    if let Some(total) = row.get("total_amount").and_then(Value::as_f64) {
        event = event.with_total(total);
    }
    Some(event)
}

fn record_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::Number(n) => n.as_i64().map(RecordId::Int),
        Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
        _ => None,
    }
}
