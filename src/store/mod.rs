//! Durable key-value store interface.
//!
//! The engines never touch a concrete store. The host injects an
//! implementation of [`DurableStore`] (browser storage, a file, a database);
//! [`MemoryStore`] is the in-process implementation used by tests and
//! embedders without persistence.
//!
//! # Example
//!
//! ```rust
//! use session_guard::store::{DurableStore, MemoryStore};
//!
//! # fn example() -> session_guard::Result<()> {
//! let store = MemoryStore::new();
//!
//! store.set("key", "value")?;
//! assert_eq!(store.get("key")?, Some("value".to_string()));
//!
//! store.remove("key")?;
//! assert!(store.get("key")?.is_none());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::Result;

/// Key-value store persisting across restarts, with finite capacity.
///
/// Calls are synchronous and never suspend. Implementations report
/// failures (including quota exhaustion) as errors; callers decide how to
/// degrade.
pub trait DurableStore {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value for a key, overwriting any existing value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. No-op if the key doesn't exist.
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every stored key.
    fn keys(&self) -> Result<Vec<String>>;

    /// Whether the store can currently accept reads and writes.
    fn is_available(&self) -> bool {
        true
    }

    /// Check if a key exists.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Every key/value pair, in no particular order.
    fn entries(&self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }
}

impl<S: DurableStore + ?Sized> DurableStore for std::rc::Rc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get() {
        let store = MemoryStore::new();

        store.set("key1", "value1").unwrap();

        assert_eq!(store.get("key1").unwrap(), Some("value1".to_string()));
    }

    #[test]
    fn test_memory_store_get_nonexistent() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_memory_store_overwrite() {
        let store = MemoryStore::new();

        store.set("key", "value1").unwrap();
        store.set("key", "value2").unwrap();

        assert_eq!(store.get("key").unwrap(), Some("value2".to_string()));
    }

    #[test]
    fn test_memory_store_remove_nonexistent() {
        let store = MemoryStore::new();
        // Should not error
        store.remove("nonexistent").unwrap();
    }

    #[test]
    fn test_entries_and_contains() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        let mut entries = store.entries().unwrap();
        entries.sort();

        assert_eq!(
            entries,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert!(store.contains("a").unwrap());
        assert!(!store.contains("c").unwrap());
    }

    #[test]
    fn test_rc_store_shares_contents() {
        let store = std::rc::Rc::new(MemoryStore::new());
        let handle: std::rc::Rc<MemoryStore> = std::rc::Rc::clone(&store);

        handle.set("k", "v").unwrap();

        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
    }
}
