//! Key-value handlers - reads and writes against the store.

use std::collections::BTreeSet;

use kvsync_engine::protocol::{
    BulkSetRequest, CountResponse, RemoveResponse, SetRequest, SetResponse,
};
use kvsync_engine::{InstanceId, Key, Snapshot};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::store::{Entry, KvStore};

/// Query parameters for snapshot reads.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    /// Comma-separated subset of keys; the whole store when absent
    pub keys: Option<String>,
}

impl SnapshotQuery {
    /// The requested key subset, or `None` for the whole store.
    pub fn key_set(&self) -> Option<BTreeSet<Key>> {
        self.keys.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect()
        })
    }
}

/// Read the whole store, or the requested subset.
pub async fn handle_get_all(store: &KvStore, query: SnapshotQuery) -> Result<Snapshot> {
    let snapshot = match query.key_set() {
        Some(keys) => store.get_many(&keys).await?,
        None => store.get_all().await?,
    };
    Ok(snapshot)
}

/// Read one entry with its timestamp.
pub async fn handle_get_entry(store: &KvStore, key: &str) -> Result<Entry> {
    store
        .get(key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("key not found: {}", key)))
}

/// Process a point write.
pub async fn handle_set(
    store: &KvStore,
    origin: Option<InstanceId>,
    request: SetRequest,
) -> Result<SetResponse> {
    let key = request.key.clone();
    store.set(origin, request.key, request.value).await?;
    Ok(SetResponse { ok: true, key })
}

/// Process a bulk write. An empty `data` object writes nothing.
pub async fn handle_bulk_set(
    store: &KvStore,
    origin: Option<InstanceId>,
    request: BulkSetRequest,
) -> Result<CountResponse> {
    let count = store.bulk_set(origin, request.data).await?;
    Ok(CountResponse { ok: true, count })
}

/// Process a single-key delete.
pub async fn handle_remove(
    store: &KvStore,
    origin: Option<InstanceId>,
    key: &str,
) -> Result<RemoveResponse> {
    let removed = store.remove(origin, key).await?;
    Ok(RemoveResponse { ok: true, removed })
}

/// Process a full clear.
pub async fn handle_clear(store: &KvStore, origin: Option<InstanceId>) -> Result<CountResponse> {
    let count = store.clear(origin).await?;
    Ok(CountResponse { ok: true, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChangeNotifier;
    use crate::store::{Backend, MemoryBackend};
    use serde_json::json;

    fn store() -> KvStore {
        KvStore::new(
            Backend::Memory(MemoryBackend::new()),
            ChangeNotifier::new_shared(8),
            64,
        )
    }

    #[test]
    fn key_list_parsing() {
        let query = SnapshotQuery {
            keys: Some("theme, meds,,shots".to_string()),
        };
        let keys = query.key_set().unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["meds", "shots", "theme"]
        );

        assert!(SnapshotQuery::default().key_set().is_none());
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let err = handle_get_entry(&store(), "nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_then_read_back() {
        let store = store();
        let response = handle_set(
            &store,
            None,
            SetRequest {
                key: "theme".into(),
                value: json!("dark"),
            },
        )
        .await
        .unwrap();
        assert!(response.ok);
        assert_eq!(response.key, "theme");

        let entry = handle_get_entry(&store, "theme").await.unwrap();
        assert_eq!(entry.value, json!("dark"));
    }
}
