//! Change events.

use crate::{InstanceId, Key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which keys a mutation touched, and which instance (if any) caused it.
///
/// `origin` is `None` when the writer is unknown, e.g. a restore performed
/// without an identity header or an event synthesized by a polling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub origin: Option<InstanceId>,
    pub keys: BTreeSet<Key>,
}

impl ChangeEvent {
    pub fn new(origin: Option<InstanceId>, keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            origin,
            keys: keys.into_iter().collect(),
        }
    }

    /// Event for a single key.
    pub fn single(origin: Option<InstanceId>, key: impl Into<Key>) -> Self {
        Self::new(origin, std::iter::once(key.into()))
    }

    /// True when this event was caused by a write from `instance`.
    pub fn is_echo_of(&self, instance: &InstanceId) -> bool {
        self.origin.as_ref() == Some(instance)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_detection() {
        let me = InstanceId::generate();
        let other = InstanceId::generate();

        assert!(ChangeEvent::single(Some(me.clone()), "theme").is_echo_of(&me));
        assert!(!ChangeEvent::single(Some(other), "theme").is_echo_of(&me));
        assert!(!ChangeEvent::single(None, "theme").is_echo_of(&me));
    }

    #[test]
    fn keys_are_deduplicated_and_ordered() {
        let event = ChangeEvent::new(None, ["b".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(event.keys.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
