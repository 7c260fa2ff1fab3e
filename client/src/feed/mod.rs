//! Change feeds: how a client learns that the server state moved.
//!
//! [`WsFeed`] holds the server's push stream open and reconnects on its own.
//! [`PollFeed`] is the fallback for environments without a persistent
//! connection; it diffs periodic snapshots into synthesized events.

use std::future::Future;

use kvsync_engine::ChangeEvent;

mod poll;
mod ws;

pub use poll::PollFeed;
pub use ws::WsFeed;

/// One observation from a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// The feed (re)established contact with the server. Events may have
    /// been missed before this point, so a full reconciliation is due.
    Connected,

    /// The server committed a mutation.
    Change(ChangeEvent),

    /// Contact with the server was lost. The feed keeps trying to recover.
    Lost(String),

    /// The feed ended for good.
    Closed,
}

/// Source of [`FeedItem`]s for a sync cache.
pub trait ChangeFeed: Send + 'static {
    /// Wait for the next item. After [`FeedItem::Closed`] the feed is not
    /// polled again.
    fn next(&mut self) -> impl Future<Output = FeedItem> + Send;
}
