//! Access layer facade
//!
//! Wires pool, registry, rotation policy, gate, classifier, waiter and retry
//! executor together behind one handle that the rest of the pipeline holds
//! in an `Arc`.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::AccountId;
use forge_client::{ErrorDisposition, ErrorResponse, GateDecision, QuotaSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::account::{Account, AccountPool};
use crate::classify::ErrorClassifier;
use crate::error::{Error, Result};
use crate::gate::PreflightGate;
use crate::health::HealthRegistry;
use crate::progress::{ProcessingLimits, ProcessingProgress};
use crate::retry::{RetryError, RetryExecutor};
use crate::rotation::RotationPolicy;
use crate::wait::ResetWaiter;

/// Tunables for the access layer.
#[derive(Debug, Clone)]
pub struct AccessSettings {
    /// Remaining-request threshold at or below which an account is parked
    pub requests_left_border: u64,
    /// Wait used when no reset time is known
    pub fallback_wait: Duration,
    /// Delay between the two attempts of the retry executor
    pub retry_delay: Duration,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            requests_left_border: 100,
            fallback_wait: Duration::from_secs(3600),
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct AccountAccess {
    pool: Arc<AccountPool>,
    registry: Arc<HealthRegistry>,
    policy: RotationPolicy,
    gate: PreflightGate,
    classifier: ErrorClassifier,
    retry: RetryExecutor,
    progress: Arc<ProcessingProgress>,
    cancel: CancellationToken,
}

impl AccountAccess {
    pub fn new(pool: AccountPool, settings: AccessSettings, limits: ProcessingLimits) -> Self {
        let pool = Arc::new(pool);
        let registry = Arc::new(HealthRegistry::new(pool.ids()));
        let progress = Arc::new(ProcessingProgress::new(limits));
        let cancel = CancellationToken::new();
        let waiter = Arc::new(ResetWaiter::new(
            registry.clone(),
            progress.clone(),
            settings.fallback_wait,
            cancel.clone(),
        ));

        info!(
            accounts = pool.len(),
            requests_left_border = settings.requests_left_border,
            fallback_wait_secs = settings.fallback_wait.as_secs(),
            retry_delay_ms = settings.retry_delay.as_millis() as u64,
            "account access initialized"
        );

        Self {
            policy: RotationPolicy::new(pool.clone(), registry.clone()),
            gate: PreflightGate::new(
                registry.clone(),
                waiter.clone(),
                settings.requests_left_border,
            ),
            classifier: ErrorClassifier::new(registry.clone(), waiter, settings.fallback_wait),
            retry: RetryExecutor::new(settings.retry_delay, cancel.clone()),
            pool,
            registry,
            progress,
            cancel,
        }
    }

    /// Account to use right now. Never blocks.
    pub fn current_account(&self) -> &Account {
        self.policy.select_current()
    }

    /// Pre-request hook: quota gate for `id` given its last snapshot.
    pub async fn preflight(&self, id: AccountId, quota: QuotaSnapshot) -> Result<GateDecision> {
        self.gate.check(id, quota).await
    }

    /// Post-response hook for a failed request sent as `id`.
    pub async fn handle_error(
        &self,
        id: AccountId,
        response: &ErrorResponse,
    ) -> Result<ErrorDisposition> {
        self.classifier.handle(id, response).await
    }

    /// Retire `id` outside the response path (e.g. its app token exchange
    /// was rejected). Fails once no valid credentials remain.
    pub fn mark_invalid_credentials(&self, id: AccountId) -> Result<()> {
        self.registry.mark_invalid_credentials(id);
        if self.registry.valid_credential_count() == 0 {
            return Err(Error::CredentialsExhausted(
                self.registry.exhausted_message(),
            ));
        }
        Ok(())
    }

    /// Run `op` through the bounded retry executor.
    pub async fn with_retry<T, E, F, Fut>(&self, op: F) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.retry.run(op).await
    }

    /// `with_retry` that skips the second attempt for failures `retryable`
    /// rejects, such as exhausted credentials.
    pub async fn with_retry_if<T, E, F, Fut, R>(
        &self,
        op: F,
        retryable: R,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        self.retry.run_if(op, retryable).await
    }

    pub fn available_account_count(&self) -> usize {
        self.registry.available_count()
    }

    pub fn valid_credential_count(&self) -> usize {
        self.registry.valid_credential_count()
    }

    pub fn total_configured_accounts(&self) -> usize {
        self.pool.len()
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.pool.get(id)
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    pub fn progress(&self) -> &ProcessingProgress {
        &self.progress
    }

    pub fn progress_summary(&self) -> String {
        self.progress.summary()
    }

    /// Registry health plus current pointer and progress.
    pub fn health(&self) -> serde_json::Value {
        let mut health = self.registry.health();
        health["current_account"] = self
            .policy
            .current_id()
            .map_or(serde_json::Value::Null, |id| id.get().into());
        health["progress"] = self.progress.summary().into();
        health
    }

    /// Abort any blocking wait or retry delay, now and in the future.
    pub fn cancel(&self) {
        info!("account access cancelled");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
