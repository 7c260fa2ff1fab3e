//! The server-side key-value store.
//!
//! [`KvStore`] is the only code path that mutates persisted entries. Every
//! successful mutation publishes exactly one [`ChangeEvent`] through the
//! [`ChangeNotifier`], after the write is durable.
//!
//! Persistence is pluggable through [`Backend`]: PostgreSQL for deployments,
//! an in-memory map for tests and database-less runs.

mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kvsync_engine::{validate_key, ChangeEvent, InstanceId, Key, Snapshot, Value};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::notify::ChangeNotifier;

/// Errors from the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidKey(#[from] kvsync_engine::Error),

    /// The database refused the value itself; retrying cannot help.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.code().is_some_and(|code| is_data_exception(&code)) => {
                StoreError::InvalidValue(db.message().to_string())
            }
            _ => StoreError::StorageUnavailable(e.to_string()),
        }
    }
}

/// SQLSTATE class 22 covers values the database can never store, such as
/// `\u0000` inside JSONB text (22P05).
fn is_data_exception(sqlstate: &str) -> bool {
    sqlstate.starts_with("22")
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One stored entry with its diagnostic timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

/// Persistence backends.
#[derive(Debug)]
pub enum Backend {
    Postgres(PgBackend),
    Memory(MemoryBackend),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres(_) => "postgres",
            Backend::Memory(_) => "memory",
        }
    }

    async fn get_all(&self) -> Result<Snapshot> {
        match self {
            Backend::Postgres(pg) => pg.get_all().await,
            Backend::Memory(mem) => mem.get_all().await,
        }
    }

    async fn get_many(&self, keys: &BTreeSet<Key>) -> Result<Snapshot> {
        match self {
            Backend::Postgres(pg) => pg.get_many(keys).await,
            Backend::Memory(mem) => mem.get_many(keys).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        match self {
            Backend::Postgres(pg) => pg.get(key).await,
            Backend::Memory(mem) => mem.get(key).await,
        }
    }

    async fn upsert(&self, key: &str, value: &Value) -> Result<()> {
        match self {
            Backend::Postgres(pg) => pg.upsert(key, value).await,
            Backend::Memory(mem) => mem.upsert(key, value).await,
        }
    }

    async fn upsert_many(&self, data: &Snapshot) -> Result<()> {
        match self {
            Backend::Postgres(pg) => pg.upsert_many(data).await,
            Backend::Memory(mem) => mem.upsert_many(data).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            Backend::Postgres(pg) => pg.delete(key).await,
            Backend::Memory(mem) => mem.delete(key).await,
        }
    }

    async fn delete_all(&self) -> Result<Vec<Key>> {
        match self {
            Backend::Postgres(pg) => pg.delete_all().await,
            Backend::Memory(mem) => mem.delete_all().await,
        }
    }
}

/// The change-notifying key-value store.
#[derive(Debug)]
pub struct KvStore {
    backend: Backend,
    notifier: Arc<ChangeNotifier>,
    /// Serializes writes so commit order equals event order.
    write_lock: Mutex<()>,
    max_key_len: usize,
}

impl KvStore {
    pub fn new(backend: Backend, notifier: Arc<ChangeNotifier>, max_key_len: usize) -> Self {
        Self {
            backend,
            notifier,
            write_lock: Mutex::new(()),
            max_key_len,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Read the whole store.
    pub async fn get_all(&self) -> Result<Snapshot> {
        self.backend.get_all().await
    }

    /// Read a subset of keys. Absent keys are omitted from the result.
    pub async fn get_many(&self, keys: &BTreeSet<Key>) -> Result<Snapshot> {
        if keys.is_empty() {
            return Ok(Snapshot::new());
        }
        self.backend.get_many(keys).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        self.backend.get(key).await
    }

    /// Upsert one entry.
    pub async fn set(&self, origin: Option<InstanceId>, key: Key, value: Value) -> Result<()> {
        validate_key(&key, self.max_key_len)?;

        let _guard = self.write_lock.lock().await;
        self.backend.upsert(&key, &value).await?;

        tracing::debug!(key = %key, origin = ?origin, "Entry written");
        self.notifier.publish(&ChangeEvent::single(origin, key));

        Ok(())
    }

    /// Upsert every entry of `data` in one atomic batch.
    ///
    /// An empty batch writes nothing and publishes nothing. Clearing the store
    /// is [`KvStore::clear`], never an empty bulk write.
    pub async fn bulk_set(&self, origin: Option<InstanceId>, data: Snapshot) -> Result<usize> {
        for key in data.keys() {
            validate_key(key, self.max_key_len)?;
        }

        if data.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        self.backend.upsert_many(&data).await?;

        let count = data.len();
        tracing::debug!(count, origin = ?origin, "Bulk write committed");
        self.notifier
            .publish(&ChangeEvent::new(origin, data.into_iter().map(|(k, _)| k)));

        Ok(count)
    }

    /// Delete one entry. Returns whether it existed; deleting an absent key
    /// is a no-op and publishes nothing.
    pub async fn remove(&self, origin: Option<InstanceId>, key: &str) -> Result<bool> {
        validate_key(key, self.max_key_len)?;

        let _guard = self.write_lock.lock().await;
        let removed = self.backend.delete(key).await?;

        if removed {
            tracing::debug!(key = %key, origin = ?origin, "Entry removed");
            self.notifier.publish(&ChangeEvent::single(origin, key));
        }

        Ok(removed)
    }

    /// Delete every entry. The event names every key that was present.
    pub async fn clear(&self, origin: Option<InstanceId>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.backend.delete_all().await?;

        let count = removed.len();
        if count > 0 {
            tracing::info!(count, origin = ?origin, "Store cleared");
            self.notifier.publish(&ChangeEvent::new(origin, removed));
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_store() -> KvStore {
        KvStore::new(
            Backend::Memory(MemoryBackend::new()),
            ChangeNotifier::new_shared(16),
            64,
        )
    }

    #[test]
    fn data_exceptions_are_not_outages() {
        assert!(is_data_exception("22P05"));
        assert!(is_data_exception("22021"));
        assert!(!is_data_exception("08006"));
        assert!(!is_data_exception("57P01"));
        assert!(!is_data_exception("40001"));

        let pool = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(pool, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_store_reads_as_empty_snapshot() {
        let store = memory_store();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_publishes_one_event_with_origin() {
        let store = memory_store();
        let mut sub = store.notifier().subscribe(None);
        let me = InstanceId::generate();

        store
            .set(Some(me.clone()), "theme".into(), json!("dark"))
            .await
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.origin, Some(me));
        assert_eq!(event.keys.into_iter().collect::<Vec<_>>(), vec!["theme"]);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn set_fully_replaces_value() {
        let store = memory_store();
        store
            .set(None, "profile".into(), json!({"sex": "other", "heightIn": 70}))
            .await
            .unwrap();
        store
            .set(None, "profile".into(), json!({"heightIn": 72}))
            .await
            .unwrap();

        let snapshot = store.get_all().await.unwrap();
        assert_eq!(snapshot.get("profile"), Some(&json!({"heightIn": 72})));
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected_without_event() {
        let store = memory_store();
        let mut sub = store.notifier().subscribe(None);

        let err = store.set(None, String::new(), json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));

        let err = store.set(None, "k".repeat(65), json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));

        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn bulk_set_is_one_event_for_all_keys() {
        let store = memory_store();
        let mut sub = store.notifier().subscribe(None);

        let data: Snapshot = (0..50).map(|i| (format!("k{}", i), json!(i))).collect();
        assert_eq!(store.bulk_set(None, data).await.unwrap(), 50);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.keys.len(), 50);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn bulk_set_with_one_bad_key_writes_nothing() {
        let store = memory_store();
        let data: Snapshot = [("good".to_string(), json!(1)), (String::new(), json!(2))]
            .into_iter()
            .collect();

        assert!(store.bulk_set(None, data).await.is_err());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_bulk_set_is_a_noop() {
        let store = memory_store();
        store.set(None, "keep".into(), json!(1)).await.unwrap();
        let mut sub = store.notifier().subscribe(None);

        assert_eq!(store.bulk_set(None, Snapshot::new()).await.unwrap(), 0);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn bulk_set_is_idempotent() {
        let store = memory_store();
        let data: Snapshot = [("a".to_string(), json!(1)), ("b".to_string(), json!([2]))]
            .into_iter()
            .collect();

        store.bulk_set(None, data.clone()).await.unwrap();
        let once = store.get_all().await.unwrap();
        store.bulk_set(None, data).await.unwrap();
        let twice = store.get_all().await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn removing_absent_key_is_silent() {
        let store = memory_store();
        let mut sub = store.notifier().subscribe(None);

        assert!(!store.remove(None, "missing").await.unwrap());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn clear_names_every_previous_key() {
        let store = memory_store();
        store.set(None, "a".into(), json!(1)).await.unwrap();
        store.set(None, "b".into(), json!(2)).await.unwrap();
        let mut sub = store.notifier().subscribe(None);

        assert_eq!(store.clear(None).await.unwrap(), 2);
        assert!(store.get_all().await.unwrap().is_empty());

        let event = sub.try_recv().unwrap();
        assert_eq!(event.keys.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_not_published() {
        let mem = MemoryBackend::new();
        mem.set_available(false);
        let store = KvStore::new(Backend::Memory(mem), ChangeNotifier::new_shared(16), 64);
        let mut sub = store.notifier().subscribe(None);

        let err = store.set(None, "k".into(), json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_key_leave_one_whole_value() {
        let store = Arc::new(memory_store());
        let mut handles = Vec::new();

        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(None, "shared".into(), json!({"writer": i, "payload": [i, i, i]}))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value = store.get_all().await.unwrap().get("shared").cloned().unwrap();
        let writer = value["writer"].as_i64().unwrap();
        assert_eq!(value["payload"], json!([writer, writer, writer]));
    }

    #[tokio::test]
    async fn get_many_returns_only_present_keys() {
        let store = memory_store();
        store.set(None, "a".into(), json!(1)).await.unwrap();
        store.set(None, "b".into(), json!(2)).await.unwrap();

        let wanted: BTreeSet<Key> = ["a".to_string(), "zzz".to_string()].into();
        let subset = store.get_many(&wanted).await.unwrap();
        assert_eq!(subset.keys().cloned().collect::<Vec<_>>(), vec!["a"]);
    }
}
