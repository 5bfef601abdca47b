use ostreehub_protocol::{encode_bundle, UploadObject};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::hub::{HubClient, UploadOutcome};
use crate::report::Progress;
use crate::repo::ObjectRef;
use crate::retry::{retry_hub, RetryConfig};

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    pub workers: usize,
    pub bundle_max_objects: usize,
    pub bundle_max_bytes: u64,
    pub max_failed_objects: u64,
    pub retry: RetryConfig,
}

/// Group objects into upload bundles of at most `max_objects` objects and
/// `max_bytes` bytes. An object larger than `max_bytes` travels alone.
pub fn plan_bundles(objects: Vec<ObjectRef>, max_objects: usize, max_bytes: u64) -> Vec<Vec<ObjectRef>> {
    let mut bundles = Vec::new();
    let mut current: Vec<ObjectRef> = Vec::new();
    let mut current_bytes = 0u64;

    for object in objects {
        if !current.is_empty()
            && (current.len() >= max_objects || current_bytes + object.size > max_bytes)
        {
            bundles.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += object.size;
        current.push(object);
    }
    if !current.is_empty() {
        bundles.push(current);
    }
    bundles
}

/// Upload `missing` with a bounded pool of workers.
///
/// A bundle that still fails after its retries is recorded as failed and the
/// push goes on, until more than `max_failed_objects` objects have failed.
/// Authentication failures stop everything at once.
pub async fn upload_objects(
    hub: &HubClient,
    missing: Vec<ObjectRef>,
    options: UploadOptions,
    progress: &Arc<Progress>,
) -> Result<()> {
    let bundles = plan_bundles(missing, options.bundle_max_objects, options.bundle_max_bytes);
    tracing::info!(bundles = bundles.len(), "uploading missing objects");

    let mut join_set: JoinSet<Result<()>> = JoinSet::new();
    for bundle in bundles {
        join_set.spawn(upload_bundle(hub.clone(), bundle, options, progress.clone()));

        while join_set.len() >= options.workers.max(1) {
            if let Some(joined) = join_set.join_next().await {
                joined.map_err(|e| Error::Task(format!("upload worker: {e}")))??;
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        joined.map_err(|e| Error::Task(format!("upload worker: {e}")))??;
    }
    Ok(())
}

async fn upload_bundle(
    hub: HubClient,
    bundle: Vec<ObjectRef>,
    options: UploadOptions,
    progress: Arc<Progress>,
) -> Result<()> {
    // read just before sending so memory stays bounded by the pool size
    let mut objects = Vec::with_capacity(bundle.len());
    let mut payload_bytes = 0u64;
    for object in &bundle {
        let data = tokio::fs::read(&object.path).await.map_err(|e| {
            Error::repository(format!("read {}: {e}", object.path.display()))
        })?;
        payload_bytes += data.len() as u64;
        objects.push(UploadObject {
            id: object.id,
            data,
        });
    }
    let body = encode_bundle(objects)?;
    let count = bundle.len() as u64;

    match retry_hub(&options.retry, "upload bundle", || hub.upload(body.clone())).await {
        Ok(outcome) => {
            if let UploadOutcome::Stored(ack) = outcome {
                if ack.received_objects != count {
                    tracing::warn!(
                        sent = count,
                        acknowledged = ack.received_objects,
                        "hub acknowledged a different number of objects"
                    );
                }
            }
            let sent = progress.add_sent(count, payload_bytes).await;
            tracing::debug!(
                objects = count,
                bytes = payload_bytes,
                total_objects = sent.objects,
                "bundle uploaded"
            );
            Ok(())
        }
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            let failed = progress.add_failed(count).await;
            for object in &bundle {
                tracing::warn!(object = %object.id, "failed to upload: {e}");
            }
            if failed > options.max_failed_objects {
                return Err(Error::Upload {
                    failed,
                    limit: options.max_failed_objects,
                });
            }
            Ok(())
        }
    }
}
