use std::fmt;

use ostreehub_protocol::CORRELATION_HEADER;
use reqwest::RequestBuilder;
use uuid::Uuid;

/// Fresh globally unique id for one push run
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation id attached to every request of a push run so the client
/// and the hub logs can be joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Use the caller's id, or generate one when it is empty
    pub fn resolve(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => CorrelationId(id.to_string()),
            _ => CorrelationId(new_correlation_id()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn attach(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(CORRELATION_HEADER, &self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
