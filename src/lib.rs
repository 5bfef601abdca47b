pub mod auth;
pub mod config;
pub mod correlation;
pub mod enumerate;
pub mod error;
pub mod hub;
pub mod negotiate;
pub mod push;
pub mod repo;
pub mod report;
pub mod retry;
pub mod sync;
pub mod upload;

#[cfg(test)]
mod testutil;

pub use auth::{Credential, CredentialInput, DEFAULT_SERVER_URL};
pub use config::PushConfig;
pub use enumerate::RefSelection;
pub use error::{Error, PushFailure, Result};
pub use push::{JobState, Pusher};
pub use report::{Report, SentStats, SyncedStats};
