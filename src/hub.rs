//! HTTP client for the OSTree hub API.
//!
//! Every method performs exactly one request; callers decide about retries.
//! All requests carry the credential's signing and the correlation id.

use ostreehub_protocol::{
    read_message, CheckRequest, CheckResponse, HubError, ObjectId, SyncStatus, UploadAck,
    UploadMessage,
};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::io::Cursor;
use std::sync::Arc;

use crate::auth::Credential;
use crate::correlation::CorrelationId;
use crate::error::{Error, Result};

/// `<server>/<api_version>/<factory>`, without the factory segment when the
/// factory is empty
pub fn api_root(server_url: &str, api_version: &str, factory: &str) -> Result<Url> {
    let mut root = Url::parse(server_url.trim())
        .map_err(|e| Error::Config(format!("invalid server URL {server_url:?}: {e}")))?;
    let mut path = root
        .path_segments_mut()
        .map_err(|()| Error::Config(format!("server URL {server_url:?} cannot take a path")))?;
    path.pop_if_empty();
    for segment in [api_version, factory] {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            path.push(segment);
        }
    }
    drop(path);
    Ok(root)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Stored(UploadAck),
    /// 409: the hub already holds the bundle's objects
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    credential: Arc<Credential>,
    root: Url,
    correlation: CorrelationId,
}

impl HubClient {
    /// `root` comes from `api_root`
    pub fn new(
        client: Client,
        credential: Arc<Credential>,
        root: Url,
        correlation: CorrelationId,
    ) -> Self {
        Self {
            client,
            credential,
            root,
            correlation,
        }
    }

    pub fn root(&self) -> &str {
        self.root.as_str()
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation
    }

    /// Each segment is percent-encoded on its own, so ids cannot change the path
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let req = self.client.request(method, self.endpoint(segments));
        self.correlation.attach(self.credential.sign(req))
    }

    /// Which of `ids` the hub does not hold
    pub async fn check(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>> {
        const OP: &str = "check";
        let req = self
            .request(Method::POST, &["objects", "check"])
            .json(&CheckRequest {
                objects: ids.to_vec(),
            });
        let body = send(OP, req).await?;
        let response: CheckResponse =
            serde_json::from_slice(&body).map_err(|e| Error::protocol(OP, e))?;
        Ok(response.missing)
    }

    /// Upload one framed bundle
    pub async fn upload(&self, body: Vec<u8>) -> Result<UploadOutcome> {
        const OP: &str = "upload";
        let req = self
            .request(Method::POST, &["objects"])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let resp = req.send().await.map_err(|source| Error::Http { op: OP, source })?;
        if resp.status() == StatusCode::CONFLICT {
            return Ok(UploadOutcome::AlreadyPresent);
        }

        let body = read_success(OP, resp).await?;
        match read_message(Cursor::new(&body[..])).map_err(|e| Error::protocol(OP, e))? {
            UploadMessage::Ack(ack) => Ok(UploadOutcome::Stored(ack)),
            UploadMessage::Error(err) => Err(Error::Status {
                op: OP,
                status: StatusCode::from_u16(err.code)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message: err.message,
            }),
            other => Err(Error::protocol(OP, format!("unexpected reply {other:?}"))),
        }
    }

    /// Replication status of this push run
    pub async fn status(&self) -> Result<SyncStatus> {
        const OP: &str = "status";
        let req = self.request(Method::GET, &["sync", self.correlation.as_str()]);
        let body = send(OP, req).await?;
        serde_json::from_slice(&body).map_err(|e| Error::protocol(OP, e))
    }

    pub async fn update_summary(&self) -> Result<()> {
        send("summary", self.request(Method::POST, &["summary"])).await?;
        Ok(())
    }
}

async fn send(op: &'static str, req: RequestBuilder) -> Result<Vec<u8>> {
    let resp = req.send().await.map_err(|source| Error::Http { op, source })?;
    read_success(op, resp).await
}

async fn read_success(op: &'static str, resp: Response) -> Result<Vec<u8>> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Auth { op, status });
    }

    let body = resp
        .bytes()
        .await
        .map_err(|source| Error::Http { op, source })?;
    if !status.is_success() {
        return Err(Error::Status {
            op,
            status,
            message: error_message(&body),
        });
    }
    Ok(body.to_vec())
}

/// Error bodies come as JSON `{code, message}`, a framed `Error` message or
/// plain text
fn error_message(body: &[u8]) -> String {
    if let Ok(err) = serde_json::from_slice::<HubError>(body) {
        return err.message;
    }
    if let Ok(UploadMessage::Error(err)) = read_message(Cursor::new(body)) {
        return err.message;
    }
    String::from_utf8_lossy(body).trim().to_string()
}
