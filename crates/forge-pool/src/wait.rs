//! Blocking wait for the earliest quota reset
//!
//! Entered when every account is unusable. Waiters are serialized: the first
//! one sleeps until the soonest reset, later ones re-check availability after
//! acquiring the lock and usually return without sleeping at all.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics::counter;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::health::HealthRegistry;
use crate::progress::ProcessingProgress;

pub struct ResetWaiter {
    registry: Arc<HealthRegistry>,
    progress: Arc<ProcessingProgress>,
    fallback_wait: Duration,
    cancel: CancellationToken,
    turn: Mutex<()>,
}

impl ResetWaiter {
    pub fn new(
        registry: Arc<HealthRegistry>,
        progress: Arc<ProcessingProgress>,
        fallback_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            progress,
            fallback_wait,
            cancel,
            turn: Mutex::new(()),
        }
    }

    /// Block until at least one account is usable.
    ///
    /// Fails with `CredentialsExhausted` when no account has valid
    /// credentials (waiting would never help) and with `Cancelled` when the
    /// cancellation token fires. Without a known reset time, sleeps for the
    /// fallback wait once and returns.
    pub async fn wait_for_reset(&self) -> Result<()> {
        let _turn = tokio::select! {
            guard = self.turn.lock() => guard,
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };

        loop {
            if self.registry.valid_credential_count() == 0 {
                return Err(Error::CredentialsExhausted(
                    self.registry.exhausted_message(),
                ));
            }
            if self.registry.any_available() {
                debug!("account available, no wait needed");
                return Ok(());
            }

            let now = SystemTime::now();
            let next = self.registry.earliest_reset();
            let wait = match next {
                Some((_, until)) => until.duration_since(now).unwrap_or(Duration::ZERO),
                None => self.fallback_wait,
            };

            warn!(
                wait_secs = wait.as_secs(),
                next_account = next.map(|(id, _)| id.get()),
                available = self.registry.available_count(),
                valid = self.registry.valid_credential_count(),
                total = self.registry.len(),
                progress = %self.progress.summary(),
                "all accounts rate limited, waiting for reset"
            );
            counter!("forge_rate_limit_waits_total").increment(1);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {
                    warn!("rate limit wait cancelled");
                    return Err(Error::Cancelled);
                }
            }

            if next.is_none() {
                return Ok(());
            }
        }
    }
}
