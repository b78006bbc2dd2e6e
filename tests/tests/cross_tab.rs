//! Cross-tab bill event propagation through the sync hub.
//!
//! Two propagators share one storage area, standing in for two open tabs.

use chrono::Utc;
use integration_tests::{fixtures, setup::TestContext};
use parking_lot::Mutex;
use realtime::{ChangeNotification, CrossTabStorage, TabId};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{BillEvent, BillEventKind, RecordId};

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn collector() -> (Arc<Mutex<Vec<BillEvent>>>, impl Fn(&BillEvent) -> sync_core::CallbackResult) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |event: &BillEvent| {
        sink.lock().push(event.clone());
        Ok(())
    })
}

/// A bill generated in tab A reaches tab B's listeners.
#[tokio::test]
async fn test_generated_bill_reaches_other_tab() {
    let ctx = TestContext::new();
    let tab_b = ctx.other_tab();
    let (seen, callback) = collector();
    let _listener = tab_b.subscribe("bill-list", callback);

    let event = BillEvent::generated(RecordId::Int(1), "B-1").with_total(250.0);
    ctx.hub.bills().emit(event);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, BillEventKind::Generated);
    assert_eq!(seen[0].bill_id, RecordId::Int(1));
    assert_eq!(seen[0].bill_number, "B-1");
    assert_eq!(seen[0].total_amount, Some(250.0));
}

/// Tab A's own listeners get the event once, not again via storage.
#[tokio::test]
async fn test_emitting_tab_receives_once() {
    let ctx = TestContext::new();
    let (seen, callback) = collector();
    let _listener = ctx.hub.bills().subscribe("dashboard", callback);

    ctx.hub.bills().emit(BillEvent::updated(RecordId::Int(2), "B-2"));

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].kind, BillEventKind::Updated);
}

/// Events older than the staleness window are not replayed.
#[tokio::test]
async fn test_stale_event_not_replayed() {
    let ctx = TestContext::new();
    let tab_b = ctx.other_tab();
    let (seen, callback) = collector();
    let _listener = tab_b.subscribe("bill-list", callback);

    let stale = serde_json::json!({
        "billId": 3,
        "billNumber": "B-3",
        "timestamp": Utc::now().timestamp_millis() - 40_000,
    });
    ctx.storage
        .set_item(TabId::new(), "lastBillGenerated", stale.to_string())
        .unwrap();

    assert!(seen.lock().is_empty());
}

/// A malformed stored value is dropped without reaching listeners.
#[tokio::test]
async fn test_malformed_value_ignored() {
    let ctx = TestContext::new();
    let tab_b = ctx.other_tab();
    let (seen, callback) = collector();
    let _listener = tab_b.subscribe("bill-list", callback);

    ctx.storage
        .set_item(TabId::new(), "lastBillDeleted", "{oops".to_string())
        .unwrap();

    assert!(seen.lock().is_empty());
}

/// An insert on the live `bills` feed becomes a generated event in every tab.
#[tokio::test]
async fn test_bill_feed_bridged_to_tabs() {
    let ctx = TestContext::new();
    let tab_b = ctx.other_tab();
    let (seen, callback) = collector();
    let _listener = tab_b.subscribe("bill-list", callback);

    let subscription = ctx.hub.bridge_bill_feed("test");
    let mux = ctx.hub.multiplexer().clone();
    eventually("bill feed to connect", || mux.is_connected()).await;

    let delivered = ctx.broker.publish(ChangeNotification::insert(
        "bills",
        fixtures::bill_row(9, "B-9", 120.5),
    ));
    assert_eq!(delivered, 1);

    eventually("bill event in tab B", || !seen.lock().is_empty()).await;
    let event = seen.lock()[0].clone();
    assert_eq!(event.kind, BillEventKind::Generated);
    assert_eq!(event.bill_id, RecordId::Int(9));
    assert_eq!(event.prescription_id, Some(RecordId::Int(7)));
    assert_eq!(event.total_amount, Some(120.5));

    subscription.unsubscribe();
    eventually("channel close", || ctx.broker.open_channels() == 0).await;
}

/// Rows on other tables are not bridged.
#[tokio::test]
async fn test_other_tables_ignored() {
    let ctx = TestContext::new();
    let tab_b = ctx.other_tab();
    let (seen, callback) = collector();
    let _listener = tab_b.subscribe("bill-list", callback);

    let _subscription = ctx.hub.bridge_bill_feed("test");
    let mux = ctx.hub.multiplexer().clone();
    eventually("bill feed to connect", || mux.is_connected()).await;

    let delivered = ctx.broker.publish(ChangeNotification::insert(
        "prescriptions",
        serde_json::json!({ "id": 1 }),
    ));
    assert_eq!(delivered, 0);
    assert!(seen.lock().is_empty());
}
