//! # kvsync engine
//!
//! The IO-free core shared by the kvsync server and client.
//!
//! A kvsync deployment keeps several clients (tabs, devices) and one
//! server-side key-value store consistent in near-real-time. This crate holds
//! the pieces of that protocol that are pure logic:
//!
//! - [`key`] - key validation shared by both sides of the wire
//! - [`InstanceId`] - the per-session identity attached to every write
//! - [`ChangeEvent`] - "these keys changed, and this instance did it"
//! - [`Snapshot`] - a point-in-time copy of the whole store
//! - [`ReconcilePlan`] - the minimal set of local mutations that makes a
//!   client's memory match a server snapshot
//! - [`protocol`] - request, response and stream message types
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here knows about sockets, databases or timers
//! - **Deterministic**: snapshots and plans use ordered maps, so the same
//!   inputs always produce the same output and the same serialization
//! - **Server wins**: reconciliation never tries to merge; any divergence from
//!   the server snapshot is overwritten
//!
//! ## Quick Start
//!
//! ```rust
//! use kvsync_engine::{ReconcilePlan, Snapshot};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! // What the client currently holds in memory.
//! let mut local: HashMap<String, serde_json::Value> = HashMap::new();
//! local.insert("theme".into(), json!("light"));
//! local.insert("stale".into(), json!(1));
//!
//! // What the server says is true.
//! let server: Snapshot = [("theme".to_string(), json!("dark"))].into_iter().collect();
//!
//! let plan = ReconcilePlan::compute(&local, &server);
//! assert_eq!(plan.changed_keys().len(), 2);
//!
//! plan.apply(&mut local);
//! assert_eq!(local.get("theme"), Some(&json!("dark")));
//! assert!(!local.contains_key("stale"));
//! ```

pub mod error;
pub mod event;
pub mod instance;
pub mod key;
pub mod protocol;
pub mod reconcile;
pub mod snapshot;

pub use error::Error;
pub use event::ChangeEvent;
pub use instance::InstanceId;
pub use key::{validate_key, DEFAULT_MAX_KEY_LEN};
pub use protocol::{StreamMessage, StreamRequest, WriteOp, INSTANCE_HEADER};
pub use reconcile::{LocalState, ReconcilePlan};
pub use snapshot::Snapshot;

/// Type aliases for clarity
pub type Key = String;
pub type Value = serde_json::Value;
