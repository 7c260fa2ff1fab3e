//! Change notification fan-out.
//!
//! Every committed mutation becomes one [`ChangeEvent`] delivered to every
//! live subscriber. Nothing is buffered across disconnects: a subscriber that
//! drops (or is dropped for lagging) must resynchronize from a snapshot.
//!
//! [`ChangeEvent`]: kvsync_engine::ChangeEvent

mod manager;

pub use manager::{ChangeNotifier, Subscription};
