//! Key-value storage shared by every tab of one browser origin.
//!
//! A write made by one tab notifies the observers of every other tab. The
//! writing tab is not notified, matching browser storage-event semantics.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sync_core::{StoreError, StoreResult};
use uuid::Uuid;

/// Identity of one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A storage write observed by a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed
    pub new_value: Option<String>,
    pub origin: TabId,
}

pub type StorageObserver = Arc<dyn Fn(&StorageChange) + Send + Sync>;

pub trait CrossTabStorage: Send + Sync {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` and notify the observers of every tab except `origin`.
    fn set_item(&self, origin: TabId, key: &str, value: String) -> StoreResult<()>;

    fn remove_item(&self, origin: TabId, key: &str) -> StoreResult<()>;

    /// Register `tab`'s observer, replacing any previous one.
    fn observe(&self, tab: TabId, observer: StorageObserver);

    fn unobserve(&self, tab: TabId);
}

/// In-memory storage shared between tabs of one process.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    observers: Mutex<Vec<(TabId, StorageObserver)>>,
    unavailable: AtomicBool,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would grow the stored total past `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Make every read and write fail, e.g. private browsing mode.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable("storage disabled"));
        }
        Ok(())
    }

    fn notify(&self, change: &StorageChange) {
        let observers: Vec<StorageObserver> = self
            .observers
            .lock()
            .iter()
            .filter(|(tab, _)| *tab != change.origin)
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(change);
        }
    }
}

impl CrossTabStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, origin: TabId, key: &str, value: String) -> StoreResult<()> {
        self.check_available()?;

        let old_value = {
            let mut items = self.items.lock();
            if let Some(quota) = self.quota_bytes {
                let used: usize = items
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if used + key.len() + value.len() > quota {
                    return Err(StoreError::unavailable("storage quota exceeded"));
                }
            }
            items.insert(key.to_string(), value.clone())
        };

        self.notify(&StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
            origin,
        });
        Ok(())
    }

    fn remove_item(&self, origin: TabId, key: &str) -> StoreResult<()> {
        self.check_available()?;

        let Some(old_value) = self.items.lock().remove(key) else {
            return Ok(());
        };
        self.notify(&StorageChange {
            key: key.to_string(),
            old_value: Some(old_value),
            new_value: None,
            origin,
        });
        Ok(())
    }

    fn observe(&self, tab: TabId, observer: StorageObserver) {
        let mut observers = self.observers.lock();
        observers.retain(|(t, _)| *t != tab);
        observers.push((tab, observer));
    }

    fn unobserve(&self, tab: TabId) {
        self.observers.lock().retain(|(t, _)| *t != tab);
    }
}
