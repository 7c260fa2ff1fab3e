//! Point-in-time copies of the whole store.
//!
//! A snapshot is what `GET /api/kv` returns and what reconciliation compares
//! against. It serializes as a flat JSON object. Uses `BTreeMap` so that
//! serialization and diffs are deterministic.

use crate::{error::Result, Error, Key, Value};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};

/// An immutable-by-convention key -> value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<Key, Value>);

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or replace one entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<Key>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Key, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys whose presence or value differs between `self` and `other`.
    ///
    /// Values are compared structurally, so two snapshots decoded from JSON
    /// with different object key order still compare equal.
    pub fn changed_keys(&self, other: &Snapshot) -> BTreeSet<Key> {
        let mut changed = BTreeSet::new();

        for (key, value) in &self.0 {
            if other.0.get(key) != Some(value) {
                changed.insert(key.clone());
            }
        }

        for key in other.0.keys() {
            if !self.0.contains_key(key) {
                changed.insert(key.clone());
            }
        }

        changed
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Deserialize from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidMessage(e.to_string()))
    }
}

impl From<BTreeMap<Key, Value>> for Snapshot {
    fn from(map: BTreeMap<Key, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(Key, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Snapshot {
    type Item = (Key, Value);
    type IntoIter = btree_map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a Key, &'a Value);
    type IntoIter = btree_map::Iter<'a, Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(pairs: &[(&str, Value)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_snapshot_serializes_as_empty_object() {
        assert_eq!(Snapshot::new().to_json().unwrap(), "{}");
    }

    #[test]
    fn serializes_as_flat_object() {
        let s = snap(&[("theme", json!("dark")), ("meds", json!([1, 2]))]);
        assert_eq!(s.to_json().unwrap(), r#"{"meds":[1,2],"theme":"dark"}"#);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Snapshot::from_json("[1,2,3]").is_err());
        assert!(Snapshot::from_json(r#""text""#).is_err());
        assert!(Snapshot::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn deterministic_serialization() {
        let mut a = Snapshot::new();
        a.insert("b", json!(2));
        a.insert("a", json!(1));

        let mut b = Snapshot::new();
        b.insert("a", json!(1));
        b.insert("b", json!(2));

        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn changed_keys_covers_updates_additions_and_removals() {
        let before = snap(&[("same", json!(1)), ("edited", json!("x")), ("gone", json!(true))]);
        let after = snap(&[("same", json!(1)), ("edited", json!("y")), ("new", json!(null))]);

        let changed = before.changed_keys(&after);
        assert_eq!(
            changed.into_iter().collect::<Vec<_>>(),
            vec!["edited", "gone", "new"]
        );
    }

    #[test]
    fn changed_keys_ignores_object_key_order() {
        let a = Snapshot::from_json(r#"{"profile":{"sex":"other","heightIn":70}}"#).unwrap();
        let b = Snapshot::from_json(r#"{"profile":{"heightIn":70,"sex":"other"}}"#).unwrap();
        assert!(a.changed_keys(&b).is_empty());
    }
}
