use ostreehub_protocol::ObjectId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::hub::HubClient;
use crate::report::Progress;
use crate::repo::ObjectRef;
use crate::retry::{retry_hub, RetryConfig};

#[derive(Debug, Clone, Copy)]
pub struct NegotiateOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub retry: RetryConfig,
}

/// Ask the hub which of `objects` it lacks. Returns the missing subset in
/// enumeration order; every object that was asked about is counted as checked.
pub async fn find_missing(
    hub: &HubClient,
    objects: &[ObjectRef],
    options: NegotiateOptions,
    progress: &Arc<Progress>,
) -> Result<Vec<ObjectRef>> {
    let missing: Arc<Mutex<HashSet<ObjectId>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();

    let ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
    for batch in ids.chunks(options.batch_size.max(1)) {
        join_set.spawn(check_batch(
            hub.clone(),
            batch.to_vec(),
            options.retry,
            missing.clone(),
            progress.clone(),
        ));

        while join_set.len() >= options.workers.max(1) {
            if let Some(joined) = join_set.join_next().await {
                finish_batch(joined)?;
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        finish_batch(joined)?;
    }

    let missing = missing.lock().await;
    let result: Vec<ObjectRef> = objects
        .iter()
        .filter(|o| missing.contains(&o.id))
        .cloned()
        .collect();

    tracing::info!(
        checked = objects.len(),
        missing = result.len(),
        "negotiated object existence with the hub"
    );
    Ok(result)
}

async fn check_batch(
    hub: HubClient,
    batch: Vec<ObjectId>,
    retry: RetryConfig,
    missing: Arc<Mutex<HashSet<ObjectId>>>,
    progress: Arc<Progress>,
) -> Result<()> {
    let reply = retry_hub(&retry, "check objects", || hub.check(&batch)).await;
    // a batch counts as checked once the hub was asked, whatever it answered
    progress.add_checked(batch.len() as u64).await;
    let reply = reply?;

    let asked: HashSet<&ObjectId> = batch.iter().collect();
    if let Some(stranger) = reply.iter().find(|id| !asked.contains(id)) {
        return Err(Error::protocol(
            "check",
            format!("hub reported {stranger} which was not asked about"),
        ));
    }

    tracing::debug!(batch = batch.len(), missing = reply.len(), "checked batch");
    missing.lock().await.extend(reply);
    Ok(())
}

/// Authentication failures keep their identity; everything else is a
/// negotiation failure. Returning early drops the JoinSet, which aborts the
/// batches still in flight.
fn finish_batch(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.is_auth() => Err(e),
        Ok(Err(e)) => Err(Error::Negotiation(Box::new(e))),
        Err(e) => Err(Error::Task(format!("existence check worker: {e}"))),
    }
}
