use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

pub const CONFIG_FILE_NAME: &str = "fiopush.toml";

/// Tuning knobs of one push (from fiopush.toml). Every key is optional.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// bundles uploaded in parallel
    pub upload_workers: usize,

    /// existence-check batches in flight
    pub negotiate_workers: usize,

    /// object ids per existence-check request
    pub check_batch_size: usize,

    pub bundle_max_objects: usize,
    pub bundle_max_bytes: u64,

    /// failed objects tolerated before the push is aborted
    pub max_failed_objects: u64,

    pub poll_interval_ms: u64,

    /// how long to wait for replication once uploads are done
    pub sync_timeout_secs: u64,

    pub request_timeout_secs: u64,

    pub retry: RetryConfig,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            upload_workers: 8,
            negotiate_workers: 4,
            check_batch_size: 1000,
            bundle_max_objects: 64,
            bundle_max_bytes: 4 * 1024 * 1024,
            max_failed_objects: 8,
            poll_interval_ms: 2_000,
            sync_timeout_secs: 300,
            request_timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl PushConfig {
    /// Load configuration with precedence: explicit file > user config dir > defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("upload_workers", self.upload_workers),
            ("negotiate_workers", self.negotiate_workers),
            ("check_batch_size", self.check_batch_size),
            ("bundle_max_objects", self.bundle_max_objects),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{key} must be greater than zero")));
            }
        }
        if self.bundle_max_bytes == 0 {
            return Err(Error::Config("bundle_max_bytes must be greater than zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
upload_workers = 2

[retry]
max_retries = 1
"#,
        )?;

        let config = PushConfig::load(Some(&path))?;

        assert_eq!(config.upload_workers, 2);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.retry_delay_ms, RetryConfig::default().retry_delay_ms);
        assert_eq!(config.check_batch_size, PushConfig::default().check_batch_size);
        Ok(())
    }

    #[test]
    fn test_zero_workers_rejected() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "upload_workers = 0\n")?;

        let err = PushConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("upload_workers")));
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let err = PushConfig::load(Some(Path::new("/nonexistent/fiopush.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
