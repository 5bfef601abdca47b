use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Result;
use crate::hub::HubClient;
use crate::report::{Progress, SentStats, SyncedStats};
use crate::retry::{retry_hub, RetryConfig};

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    /// counted from the moment uploading ends
    pub timeout: Duration,
    pub retry: RetryConfig,
}

/// Nothing left to wait for once every sent object is either synced or
/// reported as failed
pub fn replication_complete(sent: &SentStats, synced: &SyncedStats) -> bool {
    synced.synced_objects + synced.sync_failed >= sent.objects
}

/// Follow the hub's replication of this push until it completes, the hub
/// reports it is done, or `timeout` elapses after uploads finished.
///
/// `uploads_done` flips to true when the last upload worker is done. A
/// timeout is recorded in `progress`, not returned as an error. Only an
/// authentication failure ends polling with an error.
pub async fn poll_sync(
    hub: HubClient,
    progress: Arc<Progress>,
    mut uploads_done: watch::Receiver<bool>,
    options: PollOptions,
) -> Result<()> {
    let mut deadline: Option<Instant> = None;
    let mut closed = false;

    loop {
        let finished = closed || *uploads_done.borrow_and_update();
        let sent = progress.sent().await;

        if finished {
            if sent.objects == 0 {
                tracing::debug!("nothing uploaded, not waiting for sync");
                return Ok(());
            }
            deadline.get_or_insert_with(|| Instant::now() + options.timeout);
        }

        if sent.objects > 0 {
            let poll = retry_hub(&options.retry, "sync status", || hub.status());
            tokio::pin!(poll);
            // a hung request must not outlive the deadline
            let outcome = match deadline {
                Some(deadline) => tokio::select! {
                    outcome = &mut poll => Some(outcome),
                    _ = tokio::time::sleep_until(deadline) => None,
                },
                None => tokio::select! {
                    outcome = &mut poll => Some(outcome),
                    changed = uploads_done.changed() => {
                        if changed.is_err() {
                            closed = true;
                        }
                        continue;
                    }
                },
            };
            let Some(outcome) = outcome else {
                give_up(&progress, options.timeout).await;
                return Ok(());
            };

            match outcome {
                Ok(status) => {
                    let synced = progress.merge_synced(&status).await;
                    tracing::debug!(
                        synced = synced.synced_objects,
                        failed = synced.sync_failed,
                        sent = sent.objects,
                        "sync status"
                    );
                    if finished && (status.done || replication_complete(&sent, &synced)) {
                        tracing::info!(synced = synced.synced_objects, "hub finished syncing");
                        return Ok(());
                    }
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => tracing::warn!("failed to get sync status: {e}"),
            }
        }

        let mut wake = Instant::now() + options.interval;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                give_up(&progress, options.timeout).await;
                return Ok(());
            }
            wake = wake.min(deadline);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            changed = uploads_done.changed(), if !finished => {
                if changed.is_err() {
                    closed = true;
                }
            }
        }
    }
}

async fn give_up(progress: &Progress, timeout: Duration) {
    tracing::warn!(
        timeout_secs = timeout.as_secs(),
        "gave up waiting for the hub to sync"
    );
    progress.mark_sync_timed_out().await;
}
