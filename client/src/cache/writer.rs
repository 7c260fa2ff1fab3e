//! Ordered delivery of local writes.

use std::sync::Arc;

use kvsync_engine::WriteOp;
use tokio::sync::mpsc;

use super::{QueuedWrite, Shared, SyncEvent};
use crate::error::{Error, Result};
use crate::remote::Remote;

/// Deliver queued writes one at a time, in the order they were issued.
pub(super) async fn run_writer<R: Remote>(
    shared: Arc<Shared>,
    remote: Arc<R>,
    mut queue: mpsc::UnboundedReceiver<QueuedWrite>,
) {
    loop {
        let write = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            write = queue.recv() => match write {
                Some(write) => write,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = deliver(&shared, remote.as_ref(), &write.op) => result,
        };

        finish(&shared, &write, result);
    }

    tracing::debug!(instance = %shared.instance, "Write queue stopped");
}

/// Send one write, retrying transient failures with backoff.
async fn deliver<R: Remote>(shared: &Shared, remote: &R, op: &WriteOp) -> Result<()> {
    let mut backoff = shared.config.write_backoff();
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(
            shared.config.write_timeout,
            remote.write(&shared.instance, op),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        op = op.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Write failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

fn finish(shared: &Shared, write: &QueuedWrite, result: Result<()>) {
    let failed = result.is_err();

    let (drained, resync) = {
        let mut memory = shared.memory_mut();
        memory.end_write(write);
        if failed {
            memory.stats.writes_failed += 1;
        } else {
            memory.stats.writes_acknowledged += 1;
        }

        if failed {
            // Memory is ahead of the server until the next pull
            memory.resync_after_writes = true;
        }

        let drained = memory.queued == 0;
        (drained, memory.take_resync())
    };

    if let Err(error) = result {
        tracing::error!(
            op = write.op.kind(),
            keys = write.keys.len(),
            "Write abandoned: {}",
            error
        );
        shared.emit(SyncEvent::WriteFailed {
            keys: write.keys.clone(),
            error,
        });
    }

    if resync {
        shared.resync.notify_one();
    }
    if drained {
        shared.drained.notify_waiters();
    }
}
