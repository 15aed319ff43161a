//! Post-response error classification
//!
//! Maps a failed response to what it means for the account that sent it,
//! then applies that to the health registry.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::AccountId;
use forge_client::{ErrorClassification, ErrorDisposition, ErrorResponse};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::health::HealthRegistry;
use crate::wait::ResetWaiter;

/// Body fragments the forge uses for secondary and abuse rate limits.
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "secondary rate", "abuse detection"];

/// Classify a failed response.
///
/// 401 → invalid credentials. 429 → quota. 403 → quota only when it carries
/// rate-limit semantics (exhausted remaining header, `Retry-After`, or a rate
/// limit message); a plain 403 is a permission problem and propagates.
pub fn classify_response(response: &ErrorResponse) -> ErrorClassification {
    match response.status {
        401 => ErrorClassification::InvalidCredentials,
        429 => ErrorClassification::QuotaExceeded,
        403 if is_rate_limited(response) => ErrorClassification::QuotaExceeded,
        _ => ErrorClassification::Other,
    }
}

fn is_rate_limited(response: &ErrorResponse) -> bool {
    if response.rate_limit_remaining == Some(0) || response.retry_after.is_some() {
        return true;
    }
    let body = response.body.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| body.contains(marker))
}

pub struct ErrorClassifier {
    registry: Arc<HealthRegistry>,
    waiter: Arc<ResetWaiter>,
    /// Cooldown when a quota error names no reset time
    fallback_wait: Duration,
}

impl ErrorClassifier {
    pub fn new(
        registry: Arc<HealthRegistry>,
        waiter: Arc<ResetWaiter>,
        fallback_wait: Duration,
    ) -> Self {
        Self {
            registry,
            waiter,
            fallback_wait,
        }
    }

    /// Apply a failed response from `account` to the registry.
    ///
    /// Returns `Retry` when the request should be resent with a freshly
    /// resolved account and `Propagate` for failures that are not about the
    /// account. Blocks when a quota error leaves no usable account, and fails
    /// with `CredentialsExhausted` once no valid credentials remain.
    pub async fn handle(
        &self,
        account: AccountId,
        response: &ErrorResponse,
    ) -> Result<ErrorDisposition> {
        let classification = classify_response(response);
        debug!(
            account_id = %account,
            status = response.status,
            classification = classification.label(),
            "classified error response"
        );

        match classification {
            ErrorClassification::InvalidCredentials => {
                self.registry.mark_invalid_credentials(account);
                if self.registry.valid_credential_count() == 0 {
                    warn!(account_id = %account, "last valid account rejected");
                    return Err(Error::CredentialsExhausted(
                        self.registry.exhausted_message(),
                    ));
                }
                Ok(ErrorDisposition::Retry)
            }
            ErrorClassification::QuotaExceeded => {
                let until = response.reset_instant(SystemTime::now(), self.fallback_wait);
                info!(
                    account_id = %account,
                    status = response.status,
                    "rate limit response"
                );
                self.registry.mark_rate_limited(account, until);
                if !self.registry.any_available_except(account) {
                    self.waiter.wait_for_reset().await?;
                }
                Ok(ErrorDisposition::Retry)
            }
            ErrorClassification::Other => Ok(ErrorDisposition::Propagate),
        }
    }
}
