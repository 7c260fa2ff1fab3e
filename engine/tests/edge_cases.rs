//! Edge case tests for kvsync-engine
//!
//! These tests cover boundary conditions, unusual inputs and the convergence
//! properties reconciliation must hold for any input.

use kvsync_engine::{
    validate_key, ChangeEvent, InstanceId, ReconcilePlan, Snapshot, StreamMessage,
    DEFAULT_MAX_KEY_LEN,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Key Edge Cases
// ============================================================================

#[test]
fn unicode_keys() {
    let keys = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Ω≈ç√∫",
    ];

    for key in keys {
        assert!(validate_key(key, DEFAULT_MAX_KEY_LEN).is_ok(), "rejected {}", key);
    }
}

#[test]
fn max_length_is_measured_in_bytes() {
    // 4 bytes per char
    let key = "🎉".repeat(4);
    assert!(validate_key(&key, 16).is_ok());
    assert!(validate_key(&key, 15).is_err());
}

// ============================================================================
// Value Edge Cases
// ============================================================================

#[test]
fn arbitrary_json_values_survive_snapshot_roundtrip() {
    let values = vec![
        json!(null),
        json!(true),
        json!(0),
        json!(-1.5),
        json!(""),
        json!("plain string"),
        json!([]),
        json!({}),
        json!({"deep": {"nested": {"array": [1, {"x": null}]}}}),
    ];

    let snapshot: Snapshot = values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("k{}", i), v.clone()))
        .collect();

    let restored = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(restored, snapshot);
}

#[test]
fn large_snapshot_reconciles_in_one_plan() {
    let server: Snapshot = (0..5000)
        .map(|i| (format!("key_{}", i), json!(i)))
        .collect();
    let mut local: HashMap<String, Value> = HashMap::new();

    let plan = ReconcilePlan::compute(&local, &server);
    assert_eq!(plan.upserts.len(), 5000);

    plan.apply(&mut local);
    assert!(ReconcilePlan::compute(&local, &server).is_empty());
}

#[test]
fn empty_server_clears_everything() {
    let mut local: HashMap<String, Value> =
        [("a".to_string(), json!(1)), ("b".to_string(), json!(2))].into();

    let plan = ReconcilePlan::compute(&local, &Snapshot::new());
    assert_eq!(plan.removals.len(), 2);

    plan.apply(&mut local);
    assert!(local.is_empty());
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn remote_theme_change_scenario() {
    // Client B holds theme=light, A wrote theme=dark.
    let a = InstanceId::generate();
    let b = InstanceId::generate();

    let mut b_memory: HashMap<String, Value> =
        [("theme".to_string(), json!("light")), ("meds".to_string(), json!([]))].into();

    let event = ChangeEvent::single(Some(a), "theme");
    assert!(!event.is_echo_of(&b));

    let server: Snapshot = [("theme".to_string(), json!("dark")), ("meds".to_string(), json!([]))]
        .into_iter()
        .collect();

    let plan = ReconcilePlan::compute(&b_memory, &server);
    assert_eq!(plan.changed_keys().into_iter().collect::<Vec<_>>(), vec!["theme"]);

    plan.apply(&mut b_memory);
    assert_eq!(b_memory["theme"], json!("dark"));
}

#[test]
fn bulk_change_is_one_message() {
    let keys: Vec<String> = (0..50).map(|i| format!("import_{}", i)).collect();
    let event = ChangeEvent::new(None, keys);

    let text = serde_json::to_string(&StreamMessage::change(&event)).unwrap();
    let parsed: StreamMessage = serde_json::from_str(&text).unwrap();

    assert_eq!(parsed.into_event().unwrap().keys.len(), 50);
}

// ============================================================================
// Properties
// ============================================================================

fn small_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn small_map() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-e]{1,2}", small_value(), 0..12)
}

proptest! {
    #[test]
    fn applying_plan_converges(local in small_map(), server in small_map()) {
        let server = Snapshot::from(server);
        let mut local = local;

        ReconcilePlan::compute(&local, &server).apply(&mut local);

        prop_assert_eq!(Snapshot::from(local), server);
    }

    #[test]
    fn plan_is_idempotent(local in small_map(), server in small_map()) {
        let server = Snapshot::from(server);
        let mut local = local;

        ReconcilePlan::compute(&local, &server).apply(&mut local);
        let second = ReconcilePlan::compute(&local, &server);

        prop_assert!(second.is_empty());
    }

    #[test]
    fn changed_keys_match_snapshot_diff(local in small_map(), server in small_map()) {
        let server = Snapshot::from(server);
        let plan = ReconcilePlan::compute(&local, &server);

        prop_assert_eq!(plan.changed_keys(), Snapshot::from(local).changed_keys(&server));
    }
}
