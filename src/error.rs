use std::path::PathBuf;

use ostreehub_protocol::WireError;
use reqwest::StatusCode;

use crate::report::Report;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid credential archive {path}: {reason}")]
    Credential { path: PathBuf, reason: String },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Failed to check object existence on the hub: {0}")]
    Negotiation(#[source] Box<Error>),

    #[error("{failed} objects failed to upload (limit {limit})")]
    Upload { failed: u64, limit: u64 },

    #[error("Hub rejected credentials for {op}: HTTP {status}")]
    Auth { op: &'static str, status: StatusCode },

    #[error("Failed to update summary: {0}")]
    Summary(#[source] Box<Error>),

    #[error("Hub returned HTTP {status} for {op}: {message}")]
    Status {
        op: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("Request failed for {op}: {source}")]
    Http {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed hub response for {op}: {message}")]
    Protocol { op: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Push task ended unexpectedly: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn repository(msg: impl Into<String>) -> Self {
        Error::Repository(msg.into())
    }

    pub(crate) fn protocol(op: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Protocol {
            op,
            message: err.to_string(),
        }
    }

    /// Whether a retry may succeed: timeouts, connection failures, 429 and
    /// 5xx. Authentication and protocol failures are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            Error::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    /// Errors that end the whole job immediately, wherever they happen
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => Error::Io(e),
            other => Error::Protocol {
                op: "wire",
                message: other.to_string(),
            },
        }
    }
}

/// A push that ended in `Failed`, with the statistics gathered before the
/// failure.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PushFailure {
    #[source]
    pub error: Error,
    pub report: Report,
}
