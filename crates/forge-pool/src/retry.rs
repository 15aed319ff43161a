//! Bounded retry around one remote operation
//!
//! Exactly two attempts with a fixed delay between them. Account-level
//! failures are already absorbed by the provider hooks inside each attempt;
//! this only covers transient trouble (timeouts, dropped connections) that
//! survives those.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Both attempts failed; carries the second failure
    #[error("{0}")]
    Failed(E),

    #[error("cancelled before retry")]
    Cancelled,
}

pub struct RetryExecutor {
    delay: Duration,
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(delay: Duration, cancel: CancellationToken) -> Self {
        Self { delay, cancel }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op`, retrying once after the delay if it fails.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(op, |_| true).await
    }

    /// Like `run`, but a first failure for which `retryable` is false is
    /// returned at once without the delay or a second attempt.
    pub async fn run_if<T, E, F, Fut, R>(
        &self,
        mut op: F,
        retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => {
                error!(error = %e, "operation failed, not retryable");
                return Err(RetryError::Failed(e));
            }
            Err(e) => warn!(
                error = %e,
                delay_ms = self.delay.as_millis() as u64,
                "operation failed, retrying once"
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = self.cancel.cancelled() => return Err(RetryError::Cancelled),
        }

        op().await.map_err(|e| {
            error!(error = %e, attempts = MAX_ATTEMPTS, "operation failed after retry");
            RetryError::Failed(e)
        })
    }
}
