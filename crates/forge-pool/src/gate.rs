//! Pre-request quota gate
//!
//! Runs before every outgoing batch with the last quota snapshot the client
//! saw for the current account. When remaining requests drop to the
//! configured border, the account is parked until its reset and the caller
//! re-resolves; with no alternative, the gate blocks until a reset.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::AccountId;
use forge_client::{GateDecision, QuotaSnapshot};
use tracing::{debug, info};

use crate::error::Result;
use crate::health::HealthRegistry;
use crate::wait::ResetWaiter;

pub struct PreflightGate {
    registry: Arc<HealthRegistry>,
    waiter: Arc<ResetWaiter>,
    requests_left_border: u64,
}

impl PreflightGate {
    pub fn new(
        registry: Arc<HealthRegistry>,
        waiter: Arc<ResetWaiter>,
        requests_left_border: u64,
    ) -> Self {
        Self {
            registry,
            waiter,
            requests_left_border,
        }
    }

    /// Decide whether `account` may send its next batch.
    ///
    /// Evaluated fresh on every call. A snapshot whose reset time already
    /// passed describes a spent window and never blocks.
    pub async fn check(&self, account: AccountId, quota: QuotaSnapshot) -> Result<GateDecision> {
        if quota.remaining > self.requests_left_border {
            return Ok(GateDecision::Proceed);
        }

        let now = SystemTime::now();
        if quota.reset_at <= now {
            debug!(account_id = %account, remaining = quota.remaining, "quota window already reset");
            return Ok(GateDecision::Proceed);
        }

        info!(
            account_id = %account,
            remaining = quota.remaining,
            limit = quota.limit,
            border = self.requests_left_border,
            reset_in_secs = quota
                .reset_at
                .duration_since(now)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
            "requests-left border reached"
        );
        self.registry.mark_rate_limited(account, quota.reset_at);

        if self.registry.any_available_except(account) {
            return Ok(GateDecision::Retry);
        }

        self.waiter.wait_for_reset().await?;
        Ok(GateDecision::Retry)
    }
}
