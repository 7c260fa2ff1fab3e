//! Reconciliation driver.
//!
//! Bootstraps memory from the first snapshot, then reacts to the change
//! feed. Foreign change events are debounced into a single pull; this
//! cache's own echoes are skipped. A periodic pass catches anything the
//! feed missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ChangeSource, Shared, SyncEvent};
use crate::error::{Error, Result};
use crate::feed::{ChangeFeed, FeedItem};
use crate::remote::Remote;

/// Forward feed items to the driver until cancelled or the feed closes.
pub(super) async fn pump_feed<F: ChangeFeed>(
    mut feed: F,
    sink: mpsc::Sender<FeedItem>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = feed.next() => item,
        };

        let closed = matches!(item, FeedItem::Closed);
        if sink.send(item).await.is_err() || closed {
            break;
        }
    }
}

pub(super) async fn run_driver<R: Remote>(
    shared: Arc<Shared>,
    remote: Arc<R>,
    mut feed: mpsc::Receiver<FeedItem>,
) {
    if !bootstrap(&shared, remote.as_ref()).await {
        return;
    }

    let config = &shared.config;
    let mut safety_net = tokio::time::interval_at(
        Instant::now() + config.safety_net_interval,
        config.safety_net_interval,
    );
    safety_net.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut debounce = Debounce::new(config.debounce, config.max_debounce);
    let mut feed_open = true;
    let mut stream_lost = false;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,

            item = feed.recv(), if feed_open => match item {
                Some(FeedItem::Change(event)) => {
                    if event.is_echo_of(&shared.instance) {
                        shared.memory_mut().stats.echoes_skipped += 1;
                        tracing::trace!(keys = event.keys.len(), "Skipping own change");
                    } else {
                        tracing::trace!(keys = event.keys.len(), origin = ?event.origin, "Remote change");
                        debounce.schedule(Instant::now());
                    }
                }
                Some(FeedItem::Connected) => {
                    if std::mem::take(&mut stream_lost) {
                        shared.emit(SyncEvent::StreamRestored);
                    }
                    debounce.fire_now(Instant::now());
                }
                Some(FeedItem::Lost(reason)) => {
                    if !stream_lost {
                        stream_lost = true;
                        shared.emit(SyncEvent::StreamLost { reason });
                    }
                }
                Some(FeedItem::Closed) | None => {
                    feed_open = false;
                    tracing::warn!("Change feed ended, relying on periodic reconciliation");
                }
            },

            _ = shared.resync.notified() => debounce.fire_now(Instant::now()),

            _ = safety_net.tick() => {
                tracing::debug!("Periodic reconciliation");
                debounce.clear();
                run_pass(&shared, remote.as_ref()).await;
            }

            _ = sleep_until(debounce.deadline) => {
                debounce.clear();
                run_pass(&shared, remote.as_ref()).await;
            }
        }
    }

    tracing::debug!(instance = %shared.instance, "Reconciliation stopped");
}

/// Pull until the first snapshot is applied. Returns false if cancelled.
async fn bootstrap<R: Remote>(shared: &Shared, remote: &R) -> bool {
    let mut backoff = shared.config.reconnect_backoff();

    loop {
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => return false,
            result = reconcile(shared, remote) => result,
        };

        match result {
            Ok(()) => {
                shared.go_live();
                return true;
            }
            Err(e) => {
                let delay = backoff.next().unwrap_or(shared.config.retry_max_delay);
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    "Initial snapshot failed, retrying: {}",
                    e
                );
                tokio::select! {
                    _ = shared.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn run_pass<R: Remote>(shared: &Shared, remote: &R) {
    if let Err(e) = reconcile(shared, remote).await {
        tracing::warn!("Reconciliation failed: {}", e);
    }
}

/// Pull a snapshot and converge memory on it.
async fn reconcile<R: Remote>(shared: &Shared, remote: &R) -> Result<()> {
    let pulled_at = {
        let mut memory = shared.memory_mut();
        memory.stats.pulls += 1;
        memory.pull_started()
    };

    let snapshot = match tokio::time::timeout(shared.config.write_timeout, remote.get_all()).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Timeout),
    };

    let (changed, superseded, resync) = {
        let mut memory = shared.memory_mut();
        let (changed, superseded) = memory.apply_snapshot(&snapshot, pulled_at);
        // Deferred keys whose writes already finished need a pass now
        (changed, superseded, memory.take_resync())
    };

    for event in superseded {
        if let SyncEvent::Superseded { key, .. } = &event {
            tracing::info!(key = %key, "Local edit superseded by server");
        }
        shared.emit(event);
    }

    if !changed.is_empty() {
        tracing::debug!(keys = changed.len(), "Reconciled with server");
        shared.emit(SyncEvent::Changed {
            keys: changed,
            source: ChangeSource::Remote,
        });
    }

    if resync {
        shared.resync.notify_one();
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Trailing debounce with an upper bound on how long a burst can postpone
/// the pull.
#[derive(Debug)]
struct Debounce {
    quiet: Duration,
    max_wait: Duration,
    first: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debounce {
    fn new(quiet: Duration, max_wait: Duration) -> Self {
        Self {
            quiet,
            max_wait: max_wait.max(quiet),
            first: None,
            deadline: None,
        }
    }

    fn schedule(&mut self, now: Instant) {
        let first = *self.first.get_or_insert(now);
        self.deadline = Some((now + self.quiet).min(first + self.max_wait));
    }

    fn fire_now(&mut self, now: Instant) {
        self.first.get_or_insert(now);
        self.deadline = Some(now);
    }

    fn clear(&mut self) {
        self.first = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_debounce_trails_last_event() {
        let start = Instant::now();
        let mut debounce = Debounce::new(100 * MS, 1000 * MS);

        debounce.schedule(start);
        assert_eq!(debounce.deadline, Some(start + 100 * MS));

        debounce.schedule(start + 50 * MS);
        assert_eq!(debounce.deadline, Some(start + 150 * MS));
    }

    #[test]
    fn test_debounce_is_bounded() {
        let start = Instant::now();
        let mut debounce = Debounce::new(100 * MS, 250 * MS);

        for i in 0..10u32 {
            debounce.schedule(start + i * 50 * MS);
        }
        assert_eq!(debounce.deadline, Some(start + 250 * MS));
    }

    #[test]
    fn test_fire_now_and_clear() {
        let start = Instant::now();
        let mut debounce = Debounce::new(100 * MS, 1000 * MS);

        debounce.schedule(start);
        debounce.fire_now(start + 10 * MS);
        assert_eq!(debounce.deadline, Some(start + 10 * MS));

        debounce.clear();
        assert_eq!(debounce.deadline, None);

        // A new burst starts its own window
        debounce.schedule(start + 2000 * MS);
        assert_eq!(debounce.deadline, Some(start + 2100 * MS));
    }
}
