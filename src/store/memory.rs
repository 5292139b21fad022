//! In-memory store implementation using `DashMap`.
//!
//! Data is lost on process restart. Optional quota and failure switches let
//! tests exercise the capacity-exhaustion and unavailable-store paths.

use super::DurableStore;
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory key-value store.
///
/// # Example
///
/// ```rust
/// use session_guard::store::{DurableStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.set("hello", "world").unwrap();
/// assert_eq!(store.get("hello").unwrap(), Some("world".to_string()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    store: DashMap<String, String>,
    quota_chars: Option<usize>,
    fail_next_write: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create a new, unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once keys plus values exceed
    /// `quota_chars` characters.
    #[must_use]
    pub fn with_quota(quota_chars: usize) -> Self {
        Self {
            quota_chars: Some(quota_chars),
            ..Self::default()
        }
    }

    /// Get the number of entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Make the next `set` fail with a store error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Toggle availability; while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn used_chars(&self) -> usize {
        self.store
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_available()?;
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Store(format!("write rejected for key '{key}'")));
        }
        if let Some(quota) = self.quota_chars {
            let replaced = self
                .store
                .get(key)
                .map_or(0, |v| key.len() + v.value().len());
            let used = self.used_chars() - replaced + key.len() + value.len();
            if used > quota {
                return Err(Error::Capacity {
                    used,
                    capacity: quota,
                });
            }
        }
        self.store.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.store.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        Ok(self.store.iter().map(|entry| entry.key().clone()).collect())
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}
