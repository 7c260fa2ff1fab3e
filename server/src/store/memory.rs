//! In-memory backend.
//!
//! Used by tests and when no `DATABASE_URL` is configured. Contents do not
//! survive a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use kvsync_engine::{Key, Snapshot, Value};
use tokio::sync::RwLock;

use super::{Entry, Result, StoreError};

#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Key, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated storage outages. While unavailable, every operation
    /// fails with [`StoreError::StorageUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StorageUnavailable(
                "memory backend is offline".to_string(),
            ))
        }
    }

    pub(super) async fn get_all(&self) -> Result<Snapshot> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect())
    }

    pub(super) async fn get_many(&self, keys: &BTreeSet<Key>) -> Result<Snapshot> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| (k.clone(), e.value.clone())))
            .collect())
    }

    pub(super) async fn get(&self, key: &str) -> Result<Option<Entry>> {
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    pub(super) async fn upsert(&self, key: &str, value: &Value) -> Result<()> {
        self.check_available()?;
        let entry = Entry {
            key: key.to_string(),
            value: value.clone(),
            updated_at: Utc::now(),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    pub(super) async fn upsert_many(&self, data: &Snapshot) -> Result<()> {
        self.check_available()?;
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        for (key, value) in data {
            entries.insert(
                key.clone(),
                Entry {
                    key: key.clone(),
                    value: value.clone(),
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    pub(super) async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    pub(super) async fn delete_all(&self) -> Result<Vec<Key>> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let keys = entries.keys().cloned().collect();
        entries.clear();
        Ok(keys)
    }
}
