//! Retry helper for operations that fail while a remote side is still coming up

use std::future::Future;
use std::time::Duration;

/// Retry policy: a bounded number of attempts spaced by a constant delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Pause after each failed attempt
    pub delay: Duration,
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Run `operation` until it succeeds or the attempts are exhausted.
///
/// The error of the final attempt is returned unchanged.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= config.max_attempts.max(1) {
                    return Err(e);
                }

                tracing::debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = config.delay.as_millis() as u64,
                    "attempt failed, retrying"
                );

                tokio::time::sleep(config.delay).await;
            }
        }
    }
}
