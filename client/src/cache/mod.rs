//! Client-side sync cache.
//!
//! A [`ClientSyncCache`] keeps the whole key-value set in memory so reads
//! are synchronous. Writes land in memory immediately and are forwarded to
//! the server in issue order by a background writer. A background driver
//! watches the change feed and reconciles memory against server snapshots.
//!
//! # Conflicts
//!
//! The server always wins. Snapshots leave alone any key with a write that
//! is still in flight or was issued after the pull began, and a follow-up
//! reconciliation runs once the write queue drains, so the key settles on
//! whatever the server ended up with.
//! A local edit that the server replaced is reported as
//! [`SyncEvent::Superseded`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kvsync_engine::{validate_key, InstanceId, Key, ReconcilePlan, Snapshot, Value, WriteOp};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::feed::{ChangeFeed, PollFeed, WsFeed};
use crate::remote::{HttpRemote, Remote};

mod driver;
mod writer;

/// Lifecycle of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The initial snapshot has not arrived yet
    Bootstrapping,
    /// Memory tracks the server
    Live,
    /// Background work stopped; writes are refused
    Closed,
}

/// Who caused a change reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A write issued through this cache
    Local,
    /// A reconciliation against the server
    Remote,
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The initial snapshot was applied.
    Live,

    /// These keys changed in memory.
    Changed {
        keys: BTreeSet<Key>,
        source: ChangeSource,
    },

    /// A local edit was replaced by a different server value.
    Superseded {
        key: Key,
        local: Option<Value>,
        server: Option<Value>,
    },

    /// A write was abandoned after its retries ran out.
    WriteFailed { keys: BTreeSet<Key>, error: Error },

    /// The change feed lost contact with the server.
    StreamLost { reason: String },

    /// The change feed is back; a full reconciliation follows.
    StreamRestored,
}

/// Counters describing what a cache has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Snapshot requests, including failed ones
    pub pulls: u64,
    /// Change events skipped because this cache caused them
    pub echoes_skipped: u64,
    pub writes_acknowledged: u64,
    pub writes_failed: u64,
    /// Local edits replaced by the server
    pub superseded: u64,
}

/// A write waiting for, or undergoing, delivery.
#[derive(Debug)]
struct QueuedWrite {
    op: WriteOp,
    /// Keys the write touched in memory
    keys: BTreeSet<Key>,
}

#[derive(Debug, Default)]
struct Memory {
    entries: HashMap<Key, Value>,
    /// Undelivered writes per key
    in_flight: HashMap<Key, usize>,
    clears_in_flight: usize,
    /// Writes queued or being delivered
    queued: usize,
    /// Keys written locally and not yet confirmed by a snapshot
    unconfirmed: BTreeSet<Key>,
    /// Sequence number of the latest local write
    write_seq: u64,
    /// Latest write sequence per key, kept until a later pull covers it
    written_at: HashMap<Key, u64>,
    /// Sequence number of the latest clear
    cleared_at: u64,
    /// A snapshot skipped some keys or a write failed; pull again once
    /// writes drain
    resync_after_writes: bool,
    stats: SyncStats,
}

impl Memory {
    fn begin_write(&mut self, write: &QueuedWrite) {
        self.write_seq += 1;
        for key in &write.keys {
            *self.in_flight.entry(key.clone()).or_default() += 1;
            self.unconfirmed.insert(key.clone());
            self.written_at.insert(key.clone(), self.write_seq);
        }
        if matches!(write.op, WriteOp::Clear) {
            self.clears_in_flight += 1;
            self.cleared_at = self.write_seq;
        }
        self.queued += 1;
    }

    fn end_write(&mut self, write: &QueuedWrite) {
        for key in &write.keys {
            if let Some(count) = self.in_flight.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    self.in_flight.remove(key);
                }
            }
        }
        if matches!(write.op, WriteOp::Clear) {
            self.clears_in_flight = self.clears_in_flight.saturating_sub(1);
        }
        self.queued = self.queued.saturating_sub(1);
    }

    /// Marker for a pull about to start; pass it to
    /// [`apply_snapshot`](Self::apply_snapshot) with the result.
    fn pull_started(&self) -> u64 {
        self.write_seq
    }

    /// Whether a deferred reconciliation is due now. Clears the flag.
    fn take_resync(&mut self) -> bool {
        self.queued == 0 && std::mem::take(&mut self.resync_after_writes)
    }

    /// Whether `key` saw a local write the snapshot pulled at `pulled_at`
    /// cannot reflect.
    fn written_since(&self, key: &str, pulled_at: u64) -> bool {
        self.clears_in_flight > 0
            || self.cleared_at > pulled_at
            || self.in_flight.contains_key(key)
            || self.written_at.get(key).is_some_and(|seq| *seq > pulled_at)
    }

    /// Reconcile memory against `snapshot`, leaving alone keys with writes
    /// the snapshot may predate. Returns the changed keys and superseded
    /// edits.
    fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        pulled_at: u64,
    ) -> (BTreeSet<Key>, Vec<SyncEvent>) {
        let mut plan = ReconcilePlan::compute(&self.entries, snapshot);

        let deferred: Vec<Key> = plan
            .changed_keys()
            .into_iter()
            .filter(|key| self.written_since(key, pulled_at))
            .collect();
        for key in &deferred {
            plan.upserts.remove(key);
            plan.removals.remove(key);
        }
        if !deferred.is_empty() {
            self.resync_after_writes = true;
        }

        let changed = plan.changed_keys();
        let superseded: Vec<SyncEvent> = changed
            .iter()
            .filter(|key| self.unconfirmed.contains(*key))
            .map(|key| SyncEvent::Superseded {
                key: key.clone(),
                local: self.entries.get(key).cloned(),
                server: snapshot.get(key).cloned(),
            })
            .collect();

        plan.apply(&mut self.entries);

        let pending: BTreeSet<Key> = self
            .unconfirmed
            .iter()
            .filter(|key| self.written_since(key, pulled_at))
            .cloned()
            .collect();
        self.unconfirmed = pending;
        self.written_at.retain(|_, seq| *seq > pulled_at);
        self.stats.superseded += superseded.len() as u64;

        (changed, superseded)
    }
}

/// State shared between the handle and its background tasks.
struct Shared {
    instance: InstanceId,
    config: SyncConfig,
    memory: RwLock<Memory>,
    state: watch::Sender<CacheState>,
    events: broadcast::Sender<SyncEvent>,
    writes: mpsc::UnboundedSender<QueuedWrite>,
    /// Wakes `flush` callers when the write queue empties
    drained: Notify,
    /// Asks the driver for an immediate reconciliation
    resync: Notify,
    cancel: CancellationToken,
}

impl Shared {
    fn memory(&self) -> RwLockReadGuard<'_, Memory> {
        self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_mut(&self) -> RwLockWriteGuard<'_, Memory> {
        self.memory.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> CacheState {
        *self.state.borrow()
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn go_live(&self) {
        let promoted = self.state.send_if_modified(|state| {
            if *state == CacheState::Bootstrapping {
                *state = CacheState::Live;
                true
            } else {
                false
            }
        });
        if promoted {
            tracing::info!(instance = %self.instance, "Sync cache live");
            self.emit(SyncEvent::Live);
        }
    }

    /// Apply a local write to memory and queue it for the server.
    ///
    /// `apply` mutates memory and returns the keys whose value changed.
    /// The queue send happens under the memory lock so delivery order
    /// matches the order in which memory changed.
    fn submit(
        &self,
        op: WriteOp,
        apply: impl FnOnce(&mut HashMap<Key, Value>) -> BTreeSet<Key>,
    ) -> Result<()> {
        if self.state() == CacheState::Closed {
            return Err(Error::Closed);
        }

        let changed = {
            let mut memory = self.memory_mut();
            let changed = apply(&mut memory.entries);
            let keys = match op {
                WriteOp::Clear => changed.clone(),
                _ => op.keys(),
            };
            let write = QueuedWrite { op, keys };
            memory.begin_write(&write);
            if self.writes.send(write).is_err() {
                return Err(Error::Closed);
            }
            changed
        };

        if !changed.is_empty() {
            self.emit(SyncEvent::Changed {
                keys: changed,
                source: ChangeSource::Local,
            });
        }
        Ok(())
    }
}

/// In-memory mirror of the server's key-value set.
///
/// Dropping the cache stops its background tasks; undelivered writes are
/// discarded. Call [`flush`](Self::flush) first to wait for them.
pub struct ClientSyncCache {
    shared: Arc<Shared>,
}

impl ClientSyncCache {
    /// Sync with the server at `base_url` over its WebSocket change stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(base_url: &str, config: SyncConfig) -> Result<Self> {
        let instance = InstanceId::generate();
        let remote = HttpRemote::new(base_url)?;
        let feed = WsFeed::new(remote.stream_url(&instance)?, &config);
        Ok(Self::start(instance, remote, feed, config))
    }

    /// Sync with the server at `base_url` by polling snapshots.
    pub fn connect_polling(base_url: &str, config: SyncConfig) -> Result<Self> {
        let remote = HttpRemote::new(base_url)?;
        let feed = PollFeed::new(remote.clone(), config.poll_interval);
        Ok(Self::start(InstanceId::generate(), remote, feed, config))
    }

    /// Start a cache over any remote and change feed.
    ///
    /// Spawns the background tasks and returns immediately in the
    /// [`CacheState::Bootstrapping`] state.
    pub fn start<R: Remote, F: ChangeFeed>(
        instance: InstanceId,
        remote: R,
        feed: F,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(CacheState::Bootstrapping);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (feed_tx, feed_rx) = mpsc::channel(64);

        let shared = Arc::new(Shared {
            instance,
            config,
            memory: RwLock::new(Memory::default()),
            state,
            events,
            writes,
            drained: Notify::new(),
            resync: Notify::new(),
            cancel: CancellationToken::new(),
        });
        let remote = Arc::new(remote);

        tokio::spawn(driver::pump_feed(feed, feed_tx, shared.cancel.clone()));
        tokio::spawn(writer::run_writer(
            Arc::clone(&shared),
            Arc::clone(&remote),
            write_rx,
        ));
        tokio::spawn(driver::run_driver(Arc::clone(&shared), remote, feed_rx));

        tracing::info!(instance = %shared.instance, "Sync cache started");

        Self { shared }
    }

    /// The identity stamped on this cache's writes.
    pub fn instance(&self) -> &InstanceId {
        &self.shared.instance
    }

    pub fn state(&self) -> CacheState {
        self.shared.state()
    }

    /// Wait until the initial snapshot has been applied.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                CacheState::Live => return Ok(()),
                CacheState::Closed => return Err(Error::Closed),
                CacheState::Bootstrapping => {}
            }
            if state.changed().await.is_err() {
                return Err(Error::Closed);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.memory().entries.get(key).cloned()
    }

    /// Value of `key`, or `fallback` when it is absent (including before
    /// the initial snapshot arrived).
    pub fn get_or(&self, key: &str, fallback: Value) -> Value {
        self.get(key).unwrap_or(fallback)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.memory().entries.contains_key(key)
    }

    /// All keys in memory, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.shared.memory().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of the whole in-memory set.
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .memory()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.memory().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.memory().entries.is_empty()
    }

    /// Set `key` to `value` in memory and forward the write.
    pub fn set(&self, key: impl Into<Key>, value: Value) -> Result<()> {
        let key = key.into();
        validate_key(&key, self.shared.config.max_key_len)?;

        let op = WriteOp::Set {
            key: key.clone(),
            value: value.clone(),
        };
        self.shared.submit(op, move |entries| {
            entries.insert(key.clone(), value);
            BTreeSet::from([key])
        })
    }

    /// Set every entry of `data` and forward them as one write.
    ///
    /// Rejects the whole batch if any key is invalid. An empty batch is a
    /// no-op. Returns the number of entries written.
    pub fn bulk_set(&self, data: Snapshot) -> Result<usize> {
        for key in data.keys() {
            validate_key(key, self.shared.config.max_key_len)?;
        }
        if data.is_empty() {
            return Ok(0);
        }

        let count = data.len();
        let op = WriteOp::BulkSet { data: data.clone() };
        self.shared.submit(op, move |entries| {
            data.into_iter()
                .map(|(key, value)| {
                    entries.insert(key.clone(), value);
                    key
                })
                .collect()
        })?;
        Ok(count)
    }

    /// Delete `key` from memory and forward the delete.
    pub fn remove(&self, key: &str) -> Result<()> {
        validate_key(key, self.shared.config.max_key_len)?;

        let op = WriteOp::Remove {
            key: key.to_string(),
        };
        self.shared.submit(op, |entries| match entries.remove_entry(key) {
            Some((key, _)) => BTreeSet::from([key]),
            None => BTreeSet::new(),
        })
    }

    /// Delete every key, locally and on the server.
    pub fn clear(&self) -> Result<()> {
        self.shared
            .submit(WriteOp::Clear, |entries| entries.drain().map(|(k, _)| k).collect())
    }

    /// Receive application notifications. Events sent before subscribing
    /// are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        self.shared.memory().stats
    }

    /// Writes queued or being delivered.
    pub fn pending_writes(&self) -> usize {
        self.shared.memory().queued
    }

    /// Wait until every queued write was acknowledged or abandoned.
    pub async fn flush(&self) {
        loop {
            let drained = self.shared.drained.notified();
            if self.pending_writes() == 0 || self.state() == CacheState::Closed {
                return;
            }
            tokio::select! {
                _ = drained => {}
                _ = self.shared.cancel.cancelled() => return,
            }
        }
    }

    /// Stop syncing. Memory stays readable; writes are refused.
    pub fn close(&self) {
        let closed = self.shared.state.send_if_modified(|state| {
            if *state != CacheState::Closed {
                *state = CacheState::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            self.shared.cancel.cancel();
            tracing::info!(instance = %self.shared.instance, "Sync cache closed");
        }
    }
}

impl Drop for ClientSyncCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ClientSyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSyncCache")
            .field("instance", &self.shared.instance)
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}
