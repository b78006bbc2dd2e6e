//! Domain events propagated across components and tabs.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a backend row: numeric or textual (uuid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Minimal "data refresh needed" signal for consumers that only care that
/// something changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshNotice {
    pub source: String,
    pub kind: String,
    pub subject_id: RecordId,
    pub timestamp: i64,
}

/// An immutable fact that can be propagated in-process and across tabs.
///
/// Cross-tab storage holds only the latest event per storage key.
pub trait DomainEvent: Clone + Send + Sync + 'static {
    /// Storage key for this event's kind.
    fn storage_key(&self) -> &'static str;

    /// Every storage key this event family writes.
    fn storage_keys() -> &'static [&'static str];

    /// Creation instant in epoch milliseconds.
    fn timestamp_millis(&self) -> i64;

    /// Copy of the event stamped with `timestamp`.
    fn stamped(&self, timestamp: i64) -> Self;

    /// Serialize into the stored cross-tab representation.
    fn encode(&self) -> Result<String>;

    /// Parse a stored record found under `key`.
    fn decode(key: &str, raw: &str) -> Result<Self>;

    fn refresh_notice(&self) -> RefreshNotice;
}

/// Kind of bill change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillEventKind {
    Generated,
    Updated,
    Deleted,
}

impl BillEventKind {
    pub const ALL: [BillEventKind; 3] = [Self::Generated, Self::Updated, Self::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Generated => "lastBillGenerated",
            Self::Updated => "lastBillUpdated",
            Self::Deleted => "lastBillDeleted",
        }
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.storage_key() == key)
    }
}

/// A bill was generated, updated, or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillEvent {
    #[serde(rename = "type")]
    pub kind: BillEventKind,
    pub bill_id: RecordId,
    pub bill_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    pub timestamp: i64,
}

/// Stored cross-tab form; the kind lives in the storage key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredBill {
    bill_id: RecordId,
    bill_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prescription_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_amount: Option<f64>,
    timestamp: i64,
}

impl BillEvent {
    pub fn new(
        kind: BillEventKind,
        bill_id: impl Into<RecordId>,
        bill_number: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            bill_id: bill_id.into(),
            bill_number: bill_number.into(),
            prescription_id: None,
            total_amount: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn generated(bill_id: impl Into<RecordId>, bill_number: impl Into<String>) -> Self {
        Self::new(BillEventKind::Generated, bill_id, bill_number)
    }

    pub fn updated(bill_id: impl Into<RecordId>, bill_number: impl Into<String>) -> Self {
        Self::new(BillEventKind::Updated, bill_id, bill_number)
    }

    pub fn deleted(bill_id: impl Into<RecordId>, bill_number: impl Into<String>) -> Self {
        Self::new(BillEventKind::Deleted, bill_id, bill_number)
    }

    pub fn with_prescription(mut self, prescription_id: impl Into<RecordId>) -> Self {
        self.prescription_id = Some(prescription_id.into());
        self
    }

    pub fn with_total(mut self, amount: f64) -> Self {
        self.total_amount = Some(amount);
        self
    }
}

impl DomainEvent for BillEvent {
    fn storage_key(&self) -> &'static str {
        self.kind.storage_key()
    }

    fn storage_keys() -> &'static [&'static str] {
        &["lastBillGenerated", "lastBillUpdated", "lastBillDeleted"]
    }

    fn timestamp_millis(&self) -> i64 {
        self.timestamp
    }

    fn stamped(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    fn encode(&self) -> Result<String> {
        let stored = StoredBill {
            bill_id: self.bill_id.clone(),
            bill_number: self.bill_number.clone(),
            prescription_id: self.prescription_id.clone(),
            total_amount: self.total_amount,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_string(&stored)?)
    }

    fn decode(key: &str, raw: &str) -> Result<Self> {
        let kind = BillEventKind::from_storage_key(key)
            .ok_or_else(|| Error::validation(format!("unknown bill storage key: {key}")))?;
        let stored: StoredBill = serde_json::from_str(raw)?;
        Ok(Self {
            kind,
            bill_id: stored.bill_id,
            bill_number: stored.bill_number,
            prescription_id: stored.prescription_id,
            total_amount: stored.total_amount,
            timestamp: stored.timestamp,
        })
    }

    fn refresh_notice(&self) -> RefreshNotice {
        RefreshNotice {
            source: "bill".to_string(),
            kind: self.kind.as_str().to_string(),
            subject_id: self.bill_id.clone(),
            timestamp: self.timestamp,
        }
    }
}
