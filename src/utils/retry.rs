//! Bounded retry for requests the service has accepted but not finished.

use std::time::Duration;

use crate::config::QueryConfig;
use crate::error::{DimensionsError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed pause before each retry
    pub pause: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for RetryConfig {
    fn from(config: &QueryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            pause: config.retry_pause(),
        }
    }
}

/// What one attempt produced
#[derive(Debug)]
pub enum Attempt<T> {
    /// Finished, successfully or not
    Ready(T),
    /// The service asked us to come back later
    NotReady,
}

/// Run `operation` until it is ready, pausing between attempts.
///
/// Errors from `operation` are returned immediately. After
/// `1 + max_retries` attempts that all came back not ready, fails with
/// [`DimensionsError::ServiceUnavailable`].
pub fn with_retry<T, F>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<Attempt<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation()? {
            Attempt::Ready(value) => {
                if attempts > 1 {
                    tracing::info!("{} succeeded on attempt {}", what, attempts);
                }
                return Ok(value);
            }
            Attempt::NotReady if attempts > config.max_retries => {
                tracing::warn!("{} still not ready after {} attempts", what, attempts);
                return Err(DimensionsError::ServiceUnavailable(format!(
                    "Server returned code 202 {} times for {}",
                    attempts, what
                )));
            }
            Attempt::NotReady => {
                tracing::debug!(
                    "{} not ready on attempt {}, retrying in {:?}",
                    what,
                    attempts,
                    config.pause
                );
                std::thread::sleep(config.pause);
            }
        }
    }
}
