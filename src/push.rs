// Push engine - publish a local OSTree repository to the hub
//
// Workflow:
// 1. Enumerate every object reachable from the selected refs
// 2. Ask the hub which of them it lacks
// 3. Upload the missing objects in bundles
// 4. Poll the hub until it has replicated what was uploaded
// 5. Report checked / sent / synced counts

use reqwest::{Client, Url};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::Credential;
use crate::config::PushConfig;
use crate::correlation::CorrelationId;
use crate::enumerate::{enumerate_objects, RefSelection};
use crate::error::{Error, PushFailure, Result};
use crate::hub::{api_root, HubClient};
use crate::negotiate::{find_missing, NegotiateOptions};
use crate::report::{Progress, Report};
use crate::repo::OstreeRepo;
use crate::retry::retry_hub;
use crate::sync::{poll_sync, PollOptions};
use crate::upload::{upload_objects, UploadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Enumerating,
    Negotiating,
    Uploading,
    Syncing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One push of a repository to the hub.
///
/// ```ignore
/// let mut pusher = Pusher::new("/srv/ostree", credential, "v2", PushConfig::default())?;
/// pusher.push(None)?;
/// let report = pusher.wait().await?;
/// ```
pub struct Pusher {
    repo: OstreeRepo,
    credential: Arc<Credential>,
    config: PushConfig,
    refs: RefSelection,
    client: Client,
    url: Url,
    correlation: Option<CorrelationId>,
    state: Arc<watch::Sender<JobState>>,
    progress: Arc<Progress>,
    job: Option<JoinHandle<Result<()>>>,
}

impl Pusher {
    /// Validates the inputs and prepares the HTTP client. Nothing touches
    /// the network until `push`.
    pub fn new(
        repo_path: impl AsRef<Path>,
        credential: Credential,
        api_version: &str,
        config: PushConfig,
    ) -> Result<Self> {
        config.validate()?;
        let api_version = api_version.trim();
        if api_version.is_empty() {
            return Err(Error::Config("API version must not be empty".into()));
        }

        let repo = OstreeRepo::open(repo_path)?;
        let client = credential.client(config.request_timeout())?;
        let url = api_root(credential.server_url(), api_version, credential.factory())?;
        let (state, _) = watch::channel(JobState::Idle);

        Ok(Self {
            repo,
            credential: Arc::new(credential),
            config,
            refs: RefSelection::All,
            client,
            url,
            correlation: None,
            state: Arc::new(state),
            progress: Arc::new(Progress::new()),
            job: None,
        })
    }

    /// Restrict the push to some refs; all refs by default
    pub fn with_refs(mut self, refs: RefSelection) -> Self {
        self.refs = refs;
        self
    }

    pub fn repo_path(&self) -> &Path {
        self.repo.path()
    }

    /// API root every request goes to
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn factory(&self) -> &str {
        self.credential.factory()
    }

    /// Set once `push` has been called
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation.as_ref().map(CorrelationId::as_str)
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Start the push in the background and return immediately. An empty or
    /// absent correlation id is replaced by a fresh one.
    pub fn push(&mut self, correlation_id: Option<&str>) -> Result<()> {
        if self.job.is_some() {
            return Err(Error::Config("push already started".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("push needs a tokio runtime: {e}")))?;

        let correlation = CorrelationId::resolve(correlation_id);
        tracing::info!(
            url = %self.url,
            correlation_id = %correlation,
            repo = %self.repo.path().display(),
            "starting push"
        );

        let job = Job {
            repo: self.repo.clone(),
            refs: self.refs.clone(),
            hub: self.hub(correlation.clone()),
            config: self.config.clone(),
            progress: self.progress.clone(),
            state: self.state.clone(),
        };
        self.correlation = Some(correlation);
        self.job = Some(runtime.spawn(job.run()));
        Ok(())
    }

    /// Block until the push is terminal. Failures carry the statistics
    /// collected before the failure.
    pub async fn wait(&mut self) -> std::result::Result<Report, PushFailure> {
        let Some(job) = self.job.take() else {
            return Err(PushFailure {
                error: Error::Config("push was not started".into()),
                report: self.progress.snapshot().await,
            });
        };

        let outcome = match job.await {
            Ok(result) => result,
            Err(e) => {
                self.state.send_replace(JobState::Failed);
                Err(Error::Task(e.to_string()))
            }
        };
        let report = self.progress.snapshot().await;
        match outcome {
            Ok(()) => Ok(report),
            Err(error) => Err(PushFailure { error, report }),
        }
    }

    /// Ask the hub to regenerate the repository summary. Independent of any
    /// push report.
    pub async fn update_summary(&self) -> Result<()> {
        let correlation = self
            .correlation
            .clone()
            .unwrap_or_else(|| CorrelationId::resolve(None));
        let hub = self.hub(correlation);
        retry_hub(&self.config.retry, "update summary", || hub.update_summary())
            .await
            .map_err(|e| Error::Summary(Box::new(e)))?;
        tracing::info!(url = %self.url, "summary updated");
        Ok(())
    }

    fn hub(&self, correlation: CorrelationId) -> HubClient {
        HubClient::new(
            self.client.clone(),
            self.credential.clone(),
            self.url.clone(),
            correlation,
        )
    }
}

/// Everything the background task owns
struct Job {
    repo: OstreeRepo,
    refs: RefSelection,
    hub: HubClient,
    config: PushConfig,
    progress: Arc<Progress>,
    state: Arc<watch::Sender<JobState>>,
}

impl Job {
    async fn run(self) -> Result<()> {
        let state = self.state.clone();
        let result = self.execute().await;
        match &result {
            Ok(()) => {
                state.send_replace(JobState::Completed);
                tracing::info!("push completed");
            }
            Err(e) => {
                state.send_replace(JobState::Failed);
                tracing::error!("push failed: {e}");
            }
        }
        result
    }

    async fn execute(self) -> Result<()> {
        let Job {
            repo,
            refs,
            hub,
            config,
            progress,
            state,
        } = self;

        state.send_replace(JobState::Enumerating);
        let objects = tokio::task::spawn_blocking(move || enumerate_objects(&repo, &refs))
            .await
            .map_err(|e| Error::Task(format!("enumeration: {e}")))??;
        tracing::info!(objects = objects.len(), "found reachable objects");

        state.send_replace(JobState::Negotiating);
        let negotiate = NegotiateOptions {
            batch_size: config.check_batch_size,
            workers: config.negotiate_workers,
            retry: config.retry,
        };
        let missing = find_missing(&hub, &objects, negotiate, &progress).await?;
        drop(objects);

        if missing.is_empty() {
            return Ok(());
        }

        state.send_replace(JobState::Uploading);
        let (uploads_done, uploads_done_rx) = watch::channel(false);
        let poll = PollOptions {
            interval: config.poll_interval(),
            timeout: config.sync_timeout(),
            retry: config.retry,
        };
        let poller = tokio::spawn(poll_sync(hub.clone(), progress.clone(), uploads_done_rx, poll));

        let upload = UploadOptions {
            workers: config.upload_workers,
            bundle_max_objects: config.bundle_max_objects,
            bundle_max_bytes: config.bundle_max_bytes,
            max_failed_objects: config.max_failed_objects,
            retry: config.retry,
        };
        if let Err(e) = upload_objects(&hub, missing, upload, &progress).await {
            poller.abort();
            return Err(e);
        }

        uploads_done.send_replace(true);
        state.send_replace(JobState::Syncing);
        poller
            .await
            .map_err(|e| Error::Task(format!("sync poller: {e}")))??;
        Ok(())
    }
}
