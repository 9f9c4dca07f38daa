//! Bounded retry at the transport boundary.

use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::warn;

use crate::error::{Result, SyncError, TransportError, TransportResult};

/// How often a transport call is attempted before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly afterwards
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `call` until it succeeds, fails permanently, or the attempts run
    /// out. Only [`TransportError::Transient`] failures are retried.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(TransportError::Transient(message)) if attempt < max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation, attempt, max_attempts, message
                    );
                    time::sleep(self.backoff * attempt).await;
                }
                Err(TransportError::Transient(message)) => {
                    return Err(SyncError::TransientTransport {
                        attempts: attempt,
                        message,
                    })
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}
