//! Polling change feed.

use kvsync_engine::{ChangeEvent, Snapshot};
use tokio::time::{Interval, MissedTickBehavior};

use super::{ChangeFeed, FeedItem};
use crate::remote::Remote;

/// Change feed that fetches the full snapshot on an interval and reports
/// the keys that differ from the previous one.
///
/// Synthesized events carry no origin, so they are never treated as echoes.
pub struct PollFeed<R> {
    remote: R,
    interval: Interval,
    last: Option<Snapshot>,
    healthy: bool,
}

impl<R: Remote> PollFeed<R> {
    /// Must be called from within a Tokio runtime.
    pub fn new(remote: R, every: std::time::Duration) -> Self {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            remote,
            interval,
            last: None,
            healthy: false,
        }
    }
}

impl<R: Remote> ChangeFeed for PollFeed<R> {
    async fn next(&mut self) -> FeedItem {
        loop {
            self.interval.tick().await;

            let snapshot = match self.remote.get_all().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    if self.healthy {
                        self.healthy = false;
                        return FeedItem::Lost(e.to_string());
                    }
                    tracing::debug!("Poll failed: {}", e);
                    continue;
                }
            };

            let changed = self
                .last
                .as_ref()
                .map(|last| last.changed_keys(&snapshot))
                .unwrap_or_default();
            self.last = Some(snapshot);

            if !self.healthy {
                self.healthy = true;
                return FeedItem::Connected;
            }

            if !changed.is_empty() {
                return FeedItem::Change(ChangeEvent::new(None, changed));
            }
        }
    }
}
