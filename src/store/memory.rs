//! In-memory store backend
//!
//! A qualifier-ordered, mutex-guarded store used by the engine tests and by
//! embedders that want the compaction pipeline without a real wide-column
//! cluster. Rows map to `BTreeMap<qualifier, value>`, which reproduces the
//! ascending scan order the merger expects. One-shot fault hooks let tests
//! drive the throttle and error paths of the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Cell, StoreClient, StoreError};

/// In-memory [`StoreClient`] implementation
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>>,
    throttle_next_put: AtomicBool,
    fail_next_get: AtomicBool,
    fail_next_delete: AtomicBool,
    flush_hints: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell directly, bypassing the client interface (test setup)
    pub fn insert(&self, key: &[u8], qualifier: &[u8], value: &[u8]) {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(key.to_vec())
            .or_default()
            .insert(qualifier.to_vec(), value.to_vec());
    }

    /// Snapshot a row's cells in qualifier order (test inspection)
    pub fn row(&self, key: &[u8]) -> Vec<Cell> {
        let rows = self.rows.lock().unwrap();
        rows.get(key)
            .map(|cells| {
                cells
                    .iter()
                    .map(|(q, v)| Cell::new(q.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of cells currently stored in a row
    pub fn cell_count(&self, key: &[u8]) -> usize {
        let rows = self.rows.lock().unwrap();
        rows.get(key).map(|cells| cells.len()).unwrap_or(0)
    }

    /// How many times `flush_hint` has been called
    pub fn flush_hints(&self) -> usize {
        self.flush_hints.load(Ordering::Relaxed)
    }

    /// Make the next `put` fail with a throttle signal carrying the row key
    pub fn throttle_next_put(&self) {
        self.throttle_next_put.store(true, Ordering::SeqCst);
    }

    /// Make the next `get` fail with an unavailable error
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }

    /// Make the next `delete` fail with an unavailable error
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Vec<Cell>, StoreError> {
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected get failure".to_string()));
        }
        Ok(self.row(key))
    }

    async fn put(&self, key: &[u8], qualifier: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if self.throttle_next_put.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Throttle {
                key: Some(key.to_vec()),
            });
        }
        self.insert(key, qualifier, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8], qualifiers: &[Vec<u8>]) -> Result<(), StoreError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected delete failure".to_string(),
            ));
        }
        let mut rows = self.rows.lock().unwrap();
        if let Some(cells) = rows.get_mut(key) {
            for qualifier in qualifiers {
                cells.remove(qualifier);
            }
            if cells.is_empty() {
                rows.remove(key);
            }
        }
        Ok(())
    }

    fn flush_hint(&self) {
        self.flush_hints.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = MemoryStore::new();
        let key = b"row-1";

        store.put(key, &[0x00, 0x27], &[0x2A]).await.unwrap();
        store.put(key, &[0x00, 0x07], &[0x2B]).await.unwrap();

        // Scan order is ascending by qualifier bytes.
        let cells = store.get(key).await.unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].qualifier, vec![0x00, 0x07]);
        assert_eq!(cells[1].qualifier, vec![0x00, 0x27]);

        store.delete(key, &[vec![0x00, 0x07]]).await.unwrap();
        assert_eq!(store.cell_count(key), 1);
    }

    #[tokio::test]
    async fn test_throttle_injection_is_one_shot() {
        let store = MemoryStore::new();
        store.throttle_next_put();

        let err = store.put(b"k", &[0x00, 0x07], &[0x01]).await.unwrap_err();
        match err {
            StoreError::Throttle { key } => assert_eq!(key.as_deref(), Some(b"k".as_ref())),
            other => panic!("expected throttle, got {other}"),
        }

        // Second attempt goes through.
        store.put(b"k", &[0x00, 0x07], &[0x01]).await.unwrap();
        assert_eq!(store.cell_count(b"k"), 1);
    }

    #[tokio::test]
    async fn test_get_failure_injection() {
        let store = MemoryStore::new();
        store.fail_next_get();
        assert!(store.get(b"k").await.is_err());
        assert!(store.get(b"k").await.is_ok());
    }
}
