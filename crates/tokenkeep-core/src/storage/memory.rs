use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{SecureStore, StorageError};

/// In-process store. Nothing survives a restart.
///
/// Also the test double for the session store: availability can be switched
/// off and every operation is counted.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    available: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// A store that reports itself unavailable.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    /// Pre-populate a key without counting it as a write.
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries().insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current value of `key`, without counting a read.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_operations() {
        let store = MemoryStore::new().with_entry("session", "s");
        assert_eq!(store.get("session").await.unwrap().as_deref(), Some("s"));
        store.set("credentials", "c").await.unwrap();
        store.delete("session").await.unwrap();

        assert_eq!(store.read_count(), 1);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.delete_count(), 1);
        assert_eq!(store.peek("session"), None);
        assert_eq!(store.peek("credentials").as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_io() {
        let store = MemoryStore::unavailable();
        assert!(!store.is_available().await);
        assert!(matches!(
            store.get("session").await,
            Err(StorageError::Unavailable)
        ));
    }
}
