//! Request bodies and row payloads.

use uuid::Uuid;

/// A fresh identifier so suites sharing a process never share a window.
pub fn unique_identifier(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Check body with only the required fields.
pub fn check_body(action: &str, identifier: &str) -> serde_json::Value {
    serde_json::json!({
        "action": action,
        "identifier": identifier,
    })
}

/// Check body overriding the action's policy.
pub fn check_body_with_policy(
    action: &str,
    identifier: &str,
    max_attempts: u32,
    time_window_ms: u64,
) -> serde_json::Value {
    serde_json::json!({
        "action": action,
        "identifier": identifier,
        "maxAttempts": max_attempts,
        "timeWindowMs": time_window_ms,
    })
}

/// A `bills` table row as the change feed delivers it.
pub fn bill_row(id: i64, bill_number: &str, total_amount: f64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "bill_number": bill_number,
        "prescription_id": 7,
        "total_amount": total_amount,
    })
}
