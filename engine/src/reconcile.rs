//! Reconciliation of a client's memory against a server snapshot.
//!
//! This is the core of convergence. Given what a client holds locally and an
//! authoritative server snapshot, it computes the minimal set of local
//! mutations that makes the two identical.
//!
//! # Algorithm
//!
//! 1. For every key in the server snapshot whose local value is missing or
//!    differs by value equality, plan an upsert of the server value
//! 2. For every local key absent from the snapshot, plan a removal
//! 3. The union of both is the set of changed keys, reported to
//!    application subscribers in one notification
//!
//! The server always wins. The plan ignores history and
//! pending writes. Callers that care about superseded local edits compare
//! [`ReconcilePlan::changed_keys`] against their own dirty set.

use crate::{Key, Snapshot, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Anything that can act as a client's local key-value memory.
pub trait LocalState {
    fn get_value(&self, key: &str) -> Option<&Value>;

    /// All keys currently held.
    fn local_keys(&self) -> Vec<Key>;

    fn put_value(&mut self, key: Key, value: Value);

    fn delete_value(&mut self, key: &str);
}

impl LocalState for HashMap<Key, Value> {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }

    fn local_keys(&self) -> Vec<Key> {
        self.keys().cloned().collect()
    }

    fn put_value(&mut self, key: Key, value: Value) {
        self.insert(key, value);
    }

    fn delete_value(&mut self, key: &str) {
        self.remove(key);
    }
}

impl LocalState for BTreeMap<Key, Value> {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }

    fn local_keys(&self) -> Vec<Key> {
        self.keys().cloned().collect()
    }

    fn put_value(&mut self, key: Key, value: Value) {
        self.insert(key, value);
    }

    fn delete_value(&mut self, key: &str) {
        self.remove(key);
    }
}

impl LocalState for Snapshot {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }

    fn local_keys(&self) -> Vec<Key> {
        self.keys().cloned().collect()
    }

    fn put_value(&mut self, key: Key, value: Value) {
        self.insert(key, value);
    }

    fn delete_value(&mut self, key: &str) {
        self.remove(key);
    }
}

/// The local mutations needed to converge on a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
    /// Keys to overwrite (or create) with the server's value
    pub upserts: BTreeMap<Key, Value>,
    /// Keys to drop because the server no longer has them
    pub removals: BTreeSet<Key>,
}

impl ReconcilePlan {
    /// Diff `local` against the authoritative `server` snapshot.
    pub fn compute<L: LocalState + ?Sized>(local: &L, server: &Snapshot) -> Self {
        let mut plan = Self::default();

        for (key, server_value) in server {
            if local.get_value(key) != Some(server_value) {
                plan.upserts.insert(key.clone(), server_value.clone());
            }
        }

        for key in local.local_keys() {
            if !server.contains_key(&key) {
                plan.removals.insert(key);
            }
        }

        plan
    }

    /// True when local memory already matches the server.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Every key the plan touches.
    pub fn changed_keys(&self) -> BTreeSet<Key> {
        self.upserts
            .keys()
            .chain(self.removals.iter())
            .cloned()
            .collect()
    }

    /// Apply the plan to local memory.
    pub fn apply<L: LocalState + ?Sized>(&self, local: &mut L) {
        for (key, value) in &self.upserts {
            local.put_value(key.clone(), value.clone());
        }
        for key in &self.removals {
            local.delete_value(key);
        }
    }
}
