use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Backoff policy shared by every hub call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent. Exponential backoff with jitter between attempts.
pub async fn retry_hub<T, F, Fut>(config: &RetryConfig, op_name: &str, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay_ms = config.retry_delay_ms;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let jitter = rand::random::<u64>() % delay_ms.max(1);
            tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
            delay_ms = (delay_ms * 2).min(config.retry_max_delay_ms);
        }
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                tracing::warn!(
                    "{op_name}: transient error (attempt {}/{}), retrying: {e}",
                    attempt + 1,
                    config.max_retries + 1,
                );
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}
