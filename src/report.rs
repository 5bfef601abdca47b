use ostreehub_protocol::SyncStatus;
use tokio::sync::Mutex;

/// What was transmitted and acknowledged by the hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentStats {
    /// acknowledged upload requests (bundles)
    pub files: u64,
    pub objects: u64,
    pub bytes: u64,
}

/// Replication progress reported by the hub for the push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncedStats {
    pub uploaded_files: u64,
    pub synced_objects: u64,
    pub uploaded_to_cold_storage: u64,
    pub sync_failed: u64,
}

impl SyncedStats {
    /// Fold a status reply in; counters never go backwards
    pub fn merge(&mut self, status: &SyncStatus) {
        self.uploaded_files = self.uploaded_files.max(status.uploaded_files);
        self.synced_objects = self.synced_objects.max(status.synced_objects);
        self.uploaded_to_cold_storage = self
            .uploaded_to_cold_storage
            .max(status.uploaded_to_cold_storage);
        self.sync_failed = self.sync_failed.max(status.sync_failed);
    }
}

/// Final statistics of one push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub checked: u64,
    pub sent: SentStats,
    pub synced: SyncedStats,
    /// objects whose upload exhausted its retries
    pub failed_objects: u64,
    /// replication did not finish before the sync timeout
    pub sync_timed_out: bool,
}

impl Report {
    pub fn log(&self) {
        tracing::info!("Checked: {}", self.checked);
        tracing::info!(
            "Sent {} files, {} objects, {} bytes",
            self.sent.files,
            self.sent.objects,
            self.sent.bytes
        );
        tracing::info!(
            "Uploaded {} files, synced {} objects, uploaded to cold storage {} objects",
            self.synced.uploaded_files,
            self.synced.synced_objects,
            self.synced.uploaded_to_cold_storage
        );
        tracing::info!("Failed to sync {} objects", self.synced.sync_failed);
        if self.failed_objects > 0 {
            tracing::warn!("Failed to upload {} objects", self.failed_objects);
        }
        if self.sync_timed_out {
            tracing::warn!("Timed out waiting for the hub to finish syncing");
        }
    }
}

/// Counters shared by the workers of a running push. Each group has its own
/// lock so negotiation, uploads and polling never contend with each other.
#[derive(Debug, Default)]
pub struct Progress {
    checked: Mutex<u64>,
    sent: Mutex<SentStats>,
    failed_objects: Mutex<u64>,
    synced: Mutex<SyncedStats>,
    sync_timed_out: Mutex<bool>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_checked(&self, n: u64) {
        *self.checked.lock().await += n;
    }

    /// Record one acknowledged bundle. Returns the updated totals.
    pub async fn add_sent(&self, objects: u64, bytes: u64) -> SentStats {
        let mut sent = self.sent.lock().await;
        sent.files += 1;
        sent.objects += objects;
        sent.bytes += bytes;
        *sent
    }

    /// Returns the updated failure count
    pub async fn add_failed(&self, objects: u64) -> u64 {
        let mut failed = self.failed_objects.lock().await;
        *failed += objects;
        *failed
    }

    pub async fn merge_synced(&self, status: &SyncStatus) -> SyncedStats {
        let mut synced = self.synced.lock().await;
        synced.merge(status);
        *synced
    }

    pub async fn mark_sync_timed_out(&self) {
        *self.sync_timed_out.lock().await = true;
    }

    pub async fn sent(&self) -> SentStats {
        *self.sent.lock().await
    }

    pub async fn snapshot(&self) -> Report {
        Report {
            checked: *self.checked.lock().await,
            sent: *self.sent.lock().await,
            synced: *self.synced.lock().await,
            failed_objects: *self.failed_objects.lock().await,
            sync_timed_out: *self.sync_timed_out.lock().await,
        }
    }
}
