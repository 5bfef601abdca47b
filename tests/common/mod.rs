#![allow(dead_code)]

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path as UrlPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fiopush::repo::gvariant::{CommitObject, DirTreeObject};
use fiopush::repo::OstreeRepo;
use fiopush::retry::RetryConfig;
use fiopush::{PushConfig, RefSelection};
use ostreehub_protocol::{
    checksum_bytes, checksum_to_hex, decode_bundle, write_message, CheckRequest, CheckResponse,
    Checksum, HubError, ObjectId, ObjectType, SyncStatus, UploadAck, UploadMessage, CORRELATION_HEADER,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FACTORY: &str = "acme";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// everything uploaded is reported synced
    Complete,
    /// only half of what was uploaded ever syncs
    Stalled,
    /// status requests never get an answer
    Hang,
}

#[derive(Debug)]
pub struct Behavior {
    /// object names the hub already holds
    pub stored: HashSet<String>,
    /// bundles containing any of these objects fail with 500
    pub failing: HashSet<String>,
    /// answer every request with this status
    pub reject_with: Option<StatusCode>,
    /// existence checks fail with this status
    pub check_status: Option<StatusCode>,
    /// existence checks also name an object nobody asked about
    pub check_reports_stranger: bool,
    /// uploads are stored but answered with 409
    pub conflict: bool,
    pub sync: SyncMode,
    pub summary_status: StatusCode,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            stored: HashSet::new(),
            failing: HashSet::new(),
            reject_with: None,
            check_status: None,
            check_reports_stranger: false,
            conflict: false,
            sync: SyncMode::Complete,
            summary_status: StatusCode::OK,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Traffic {
    pub check_requests: u64,
    pub checked_ids: u64,
    pub upload_requests: u64,
    pub status_requests: u64,
    /// sync ids as the hub decoded them from the path
    pub status_ids: HashSet<String>,
    pub summary_requests: u64,
    pub correlation_ids: HashSet<String>,
    pub authorization: HashSet<String>,
}

#[derive(Default)]
struct Uploaded {
    bundles: u64,
    objects: u64,
}

struct HubState {
    behavior: Mutex<Behavior>,
    traffic: Mutex<Traffic>,
    uploaded: Mutex<HashMap<String, Uploaded>>,
}

impl HubState {
    fn record(&self, headers: &HeaderMap) -> Option<String> {
        let correlation = headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut traffic = self.traffic.lock().unwrap();
        if let Some(id) = &correlation {
            traffic.correlation_ids.insert(id.clone());
        }
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            traffic.authorization.insert(auth.to_string());
        }
        correlation
    }

    fn rejection(&self) -> Option<Response> {
        let status = self.behavior.lock().unwrap().reject_with;
        status.map(IntoResponse::into_response)
    }
}

/// In-process OSTree hub serving `/v2/acme/...` on a random local port
pub struct MockHub {
    pub url: String,
    state: Arc<HubState>,
}

impl MockHub {
    pub async fn start(behavior: Behavior) -> Result<Self> {
        let state = Arc::new(HubState {
            behavior: Mutex::new(behavior),
            traffic: Mutex::new(Traffic::default()),
            uploaded: Mutex::new(HashMap::new()),
        });

        let root = format!("/v2/{FACTORY}");
        let app = Router::new()
            .route(&format!("{root}/objects/check"), post(check_handler))
            .route(&format!("{root}/objects"), post(upload_handler))
            .route(&format!("{root}/sync/{{id}}"), get(status_handler))
            .route(&format!("{root}/summary"), post(summary_handler))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            url: format!("http://{addr}"),
            state,
        })
    }

    pub fn traffic(&self) -> Traffic {
        self.state.traffic.lock().unwrap().clone()
    }

    pub fn stored(&self) -> HashSet<String> {
        self.state.behavior.lock().unwrap().stored.clone()
    }

    pub fn set_summary_status(&self, status: StatusCode) {
        self.state.behavior.lock().unwrap().summary_status = status;
    }
}

async fn check_handler(
    State(hub): State<Arc<HubState>>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Response {
    hub.record(&headers);
    {
        let mut traffic = hub.traffic.lock().unwrap();
        traffic.check_requests += 1;
        traffic.checked_ids += req.objects.len() as u64;
    }
    if let Some(rejection) = hub.rejection() {
        return rejection;
    }

    let behavior = hub.behavior.lock().unwrap();
    if let Some(status) = behavior.check_status {
        return status.into_response();
    }
    let mut missing: Vec<ObjectId> = req
        .objects
        .into_iter()
        .filter(|id| !behavior.stored.contains(&id.name()))
        .collect();
    if behavior.check_reports_stranger {
        missing.push(ObjectId::new(
            checksum_bytes(b"not part of this push"),
            ObjectType::File,
        ));
    }
    Json(CheckResponse { missing }).into_response()
}

async fn upload_handler(
    State(hub): State<Arc<HubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation = hub.record(&headers).unwrap_or_default();
    hub.traffic.lock().unwrap().upload_requests += 1;
    if let Some(rejection) = hub.rejection() {
        return rejection;
    }

    let objects = match decode_bundle(&body) {
        Ok(objects) => objects,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut behavior = hub.behavior.lock().unwrap();
    if objects
        .iter()
        .any(|o| behavior.failing.contains(&o.id.name()))
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HubError {
                code: 500,
                message: "storage unavailable".into(),
            }),
        )
            .into_response();
    }

    let mut received_bytes = 0;
    for object in &objects {
        received_bytes += object.data.len() as u64;
        behavior.stored.insert(object.id.name());
    }
    let conflict = behavior.conflict;
    drop(behavior);

    let mut uploaded = hub.uploaded.lock().unwrap();
    let entry = uploaded.entry(correlation).or_default();
    entry.bundles += 1;
    entry.objects += objects.len() as u64;
    drop(uploaded);
    if conflict {
        return (StatusCode::CONFLICT, "objects already exist").into_response();
    }

    let mut buf = Vec::new();
    write_message(
        &mut buf,
        &UploadMessage::Ack(UploadAck {
            received_objects: objects.len() as u64,
            received_bytes,
        }),
    )
    .unwrap();
    buf.into_response()
}

async fn status_handler(
    State(hub): State<Arc<HubState>>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    hub.record(&headers);
    {
        let mut traffic = hub.traffic.lock().unwrap();
        traffic.status_requests += 1;
        traffic.status_ids.insert(id.clone());
    }
    if let Some(rejection) = hub.rejection() {
        return rejection;
    }

    let sync = hub.behavior.lock().unwrap().sync;
    if sync == SyncMode::Hang {
        tokio::time::sleep(Duration::from_secs(600)).await;
    }
    let uploaded = hub.uploaded.lock().unwrap();
    let (bundles, objects) = uploaded
        .get(&id)
        .map(|u| (u.bundles, u.objects))
        .unwrap_or_default();

    let status = match sync {
        SyncMode::Complete => SyncStatus {
            uploaded_files: bundles,
            synced_objects: objects,
            ..Default::default()
        },
        SyncMode::Stalled | SyncMode::Hang => SyncStatus {
            uploaded_files: bundles,
            synced_objects: objects / 2,
            ..Default::default()
        },
    };
    Json(status).into_response()
}

async fn summary_handler(State(hub): State<Arc<HubState>>, headers: HeaderMap) -> Response {
    hub.record(&headers);
    hub.traffic.lock().unwrap().summary_requests += 1;
    if let Some(rejection) = hub.rejection() {
        return rejection;
    }
    let status = hub.behavior.lock().unwrap().summary_status;
    status.into_response()
}

/// Archive-mode OSTree repository in a temp dir
pub struct Fixture {
    dir: TempDir,
    commits: u64,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("objects"))?;
        fs::create_dir_all(dir.path().join("refs/heads"))?;
        fs::write(
            dir.path().join("config"),
            "[core]\nrepo_version=1\nmode=archive-z2\n",
        )?;
        Ok(Self { dir, commits: 0 })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, checksum: &Checksum, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let hex = checksum_to_hex(checksum);
        let dir = self.path().join("objects").join(&hex[..2]);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.{}", &hex[2..], ext));
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn metadata(&self, object_type: ObjectType, bytes: &[u8]) -> Result<Checksum> {
        let checksum = checksum_bytes(bytes);
        self.write(&checksum, object_type.extension(), bytes)?;
        Ok(checksum)
    }

    /// Commit a flat tree of `files` and point `branch` at it
    pub fn commit(&mut self, branch: &str, files: &[(&str, &[u8])]) -> Result<Checksum> {
        let mut meta = vec![0u8; 8];
        meta.extend_from_slice(&0o40755u32.to_be_bytes());
        let meta = self.metadata(ObjectType::DirMeta, &meta)?;

        let mut entries = Vec::new();
        for (name, content) in files {
            let checksum = checksum_bytes(content);
            self.write(&checksum, "filez", content)?;
            entries.push((name.to_string(), checksum));
        }
        let tree = DirTreeObject {
            files: entries,
            dirs: Vec::new(),
        };
        let tree = self.metadata(ObjectType::DirTree, &tree.to_bytes())?;

        self.commits += 1;
        let commit = CommitObject {
            parent: None,
            subject: format!("build {}", self.commits),
            body: String::new(),
            timestamp: 1_700_000_000 + self.commits,
            root_tree: tree,
            root_meta: meta,
        };
        let commit = self.metadata(ObjectType::Commit, &commit.to_bytes())?;

        let ref_path = self.path().join("refs/heads").join(branch);
        if let Some(parent) = ref_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(ref_path, checksum_to_hex(&commit) + "\n")?;
        Ok(commit)
    }

    /// Names and total on-disk size of every reachable object
    pub fn objects(&self) -> Result<(Vec<String>, u64)> {
        let repo = OstreeRepo::open(self.path())?;
        let objects = fiopush::enumerate::enumerate_objects(&repo, &RefSelection::All)?;
        let bytes = objects.iter().map(|o| o.size).sum();
        Ok((objects.iter().map(|o| o.id.name()).collect(), bytes))
    }
}

/// Short timeouts and near-instant retries
pub fn fast_config() -> PushConfig {
    PushConfig {
        poll_interval_ms: 20,
        sync_timeout_secs: 1,
        request_timeout_secs: 5,
        retry: RetryConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            retry_max_delay_ms: 2,
        },
        ..Default::default()
    }
}

pub fn content_name(content: &[u8]) -> String {
    format!("{}.filez", checksum_to_hex(&checksum_bytes(content)))
}
