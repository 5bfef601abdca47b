//! Credential selection and request signing.
//!
//! Exactly one of three shapes authenticates a push: an API token for a
//! factory, a credential archive carrying a TLS client identity, or nothing
//! at all for a public hub.

use flate2::read::GzDecoder;
use reqwest::{Certificate, Client, ClientBuilder, Identity, RequestBuilder};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_SERVER_URL: &str = "https://api.foundries.io/ota/ostreehub";

const TREEHUB_JSON: &str = "treehub.json";
const CLIENT_CERT: &str = "client.pem";
const CLIENT_KEY: &str = "pkey.pem";
const ROOT_CA: &str = "root.crt";

/// Raw inputs as the caller received them; empty strings mean "not given"
#[derive(Debug, Clone, Default)]
pub struct CredentialInput {
    pub server_url: String,
    pub factory: String,
    pub token: String,
    pub archive: Option<PathBuf>,
}

#[derive(Clone)]
pub enum Credential {
    Token {
        server_url: String,
        factory: String,
        token: String,
    },
    Archive(ArchiveCredential),
    Anonymous {
        server_url: String,
        factory: String,
    },
}

/// Material extracted from a credential archive
#[derive(Clone)]
pub struct ArchiveCredential {
    pub server_url: String,
    pub factory: String,
    identity_pem: Vec<u8>,
    root_ca_pem: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct TreehubJson {
    ostree: OstreeSection,
    #[serde(default)]
    factory: Option<String>,
}

#[derive(Deserialize)]
struct OstreeSection {
    server: String,
}

impl Credential {
    /// Pick the credential: token + factory, then archive, then anonymous
    pub fn select(input: &CredentialInput) -> Result<Self> {
        let token = input.token.trim();
        let factory = input.factory.trim();

        if !token.is_empty() && !factory.is_empty() {
            let server_url = match input.server_url.trim() {
                "" => DEFAULT_SERVER_URL,
                url => url,
            };
            return Ok(Credential::Token {
                server_url: server_url.to_string(),
                factory: factory.to_string(),
                token: token.to_string(),
            });
        }

        if let Some(path) = input.archive.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            return Credential::from_archive(path);
        }

        if !token.is_empty() {
            return Err(Error::Config(
                "an access token requires a factory name".into(),
            ));
        }

        let server_url = input.server_url.trim();
        if server_url.is_empty() {
            return Err(Error::Config(
                "no server URL, credential archive or token and factory given".into(),
            ));
        }

        Ok(Credential::Anonymous {
            server_url: server_url.to_string(),
            factory: factory.to_string(),
        })
    }

    /// Read a gzip-compressed tar credential archive into memory
    pub fn from_archive(path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::Credential {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        let mut treehub = None;
        let mut cert = None;
        let mut key = None;
        let mut root_ca = None;

        let entries = archive.entries().map_err(|e| invalid(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| invalid(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| invalid(e.to_string()))?
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let slot = match name.as_str() {
                TREEHUB_JSON => &mut treehub,
                CLIENT_CERT => &mut cert,
                CLIENT_KEY => &mut key,
                ROOT_CA => &mut root_ca,
                _ => continue,
            };
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| invalid(format!("{name}: {e}")))?;
            *slot = Some(buf);
        }

        let treehub = treehub.ok_or_else(|| invalid(format!("missing {TREEHUB_JSON}")))?;
        let cert = cert.ok_or_else(|| invalid(format!("missing {CLIENT_CERT}")))?;
        let key = key.ok_or_else(|| invalid(format!("missing {CLIENT_KEY}")))?;

        let info: TreehubJson = serde_json::from_slice(&treehub)
            .map_err(|e| invalid(format!("{TREEHUB_JSON}: {e}")))?;
        if info.ostree.server.trim().is_empty() {
            return Err(invalid(format!("{TREEHUB_JSON} has no ostree server")));
        }

        let mut identity_pem = cert;
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(&key);
        let archive = ArchiveCredential {
            server_url: info.ostree.server.trim().to_string(),
            factory: info.factory.unwrap_or_default(),
            identity_pem,
            root_ca_pem: root_ca,
        };

        // the TLS stack only checks the key material when a client is built
        archive
            .configure(Client::builder())
            .and_then(ClientBuilder::build)
            .map_err(|e| invalid(format!("bad client certificate, key or {ROOT_CA}: {e}")))?;

        Ok(Credential::Archive(archive))
    }

    pub fn server_url(&self) -> &str {
        match self {
            Credential::Token { server_url, .. } | Credential::Anonymous { server_url, .. } => {
                server_url
            }
            Credential::Archive(archive) => &archive.server_url,
        }
    }

    pub fn factory(&self) -> &str {
        match self {
            Credential::Token { factory, .. } | Credential::Anonymous { factory, .. } => factory,
            Credential::Archive(archive) => &archive.factory,
        }
    }

    /// Attach request-level authorization
    pub fn sign(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Token { token, .. } => req.bearer_auth(token),
            Credential::Archive(_) | Credential::Anonymous { .. } => req,
        }
    }

    /// HTTP client carrying connection-level authorization (TLS client identity)
    pub fn client(&self, timeout: Duration) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fiopush/", env!("CARGO_PKG_VERSION")));

        if let Credential::Archive(archive) = self {
            builder = archive
                .configure(builder)
                .map_err(|e| Error::Config(format!("client identity: {e}")))?;
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
    }
}

impl ArchiveCredential {
    fn configure(&self, builder: ClientBuilder) -> reqwest::Result<ClientBuilder> {
        let mut builder = builder.identity(Identity::from_pem(&self.identity_pem)?);
        if let Some(ca) = &self.root_ca_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(ca)?);
        }
        Ok(builder)
    }
}

// Never print secrets.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token {
                server_url,
                factory,
                ..
            } => f
                .debug_struct("Token")
                .field("server_url", server_url)
                .field("factory", factory)
                .finish_non_exhaustive(),
            Credential::Archive(archive) => f
                .debug_struct("Archive")
                .field("server_url", &archive.server_url)
                .field("factory", &archive.factory)
                .finish_non_exhaustive(),
            Credential::Anonymous {
                server_url,
                factory,
            } => f
                .debug_struct("Anonymous")
                .field("server_url", server_url)
                .field("factory", factory)
                .finish(),
        }
    }
}
