//! # kvsync-client
//!
//! Client side of kvsync: an in-memory cache that mirrors the server's
//! key-value set, forwards local writes, and converges on server snapshots
//! whenever another instance changes something.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvsync_client::{ClientSyncCache, SyncConfig, SyncEvent};
//! use serde_json::json;
//!
//! # async fn run() -> kvsync_client::Result<()> {
//! let cache = ClientSyncCache::connect("http://localhost:8080", SyncConfig::default())?;
//! cache.ready().await?;
//!
//! let mut events = cache.subscribe();
//! cache.set("theme", json!("dark"))?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SyncEvent::Changed { keys, .. } = event {
//!         println!("changed: {:?}", keys);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: The sync cache and its background tasks
//! - [`remote`]: Snapshot reads and writes against the server
//! - [`feed`]: Push and polling change feeds
//! - [`config`]: Timing and retry settings

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod remote;

pub use cache::{CacheState, ChangeSource, ClientSyncCache, SyncEvent, SyncStats};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use feed::{ChangeFeed, FeedItem, PollFeed, WsFeed};
pub use remote::{HttpRemote, Remote};
