//! Per-account health registry
//!
//! Holds the runtime state of every pool account in a concurrent map keyed by
//! account id. Writes to different accounts never contend; a write to one
//! account is visible to the next read of that account from any task.
//!
//! Rate-limit expiry is lazy: a `RateLimited` entry whose `until` has passed
//! is flipped back to `Available` the next time someone asks about it.

use std::time::{Duration, SystemTime};

use common::AccountId;
use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, info, warn};

/// Runtime state of one account.
///
/// Transitions:
/// - Available → RateLimited (quota border reached, 403/429 rate limit)
/// - RateLimited → RateLimited (new reset time, last write wins)
/// - RateLimited → Available (reset time passed, on next check)
/// - Available | RateLimited → InvalidCredentials (401, terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Available,
    RateLimited { until: SystemTime },
    InvalidCredentials,
}

impl AccountState {
    /// State label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            AccountState::Available => "available",
            AccountState::RateLimited { .. } => "rate_limited",
            AccountState::InvalidCredentials => "invalid_credentials",
        }
    }

    /// Whether the account may serve a request at `now`, without mutating.
    fn usable_at(&self, now: SystemTime) -> bool {
        match self {
            AccountState::Available => true,
            AccountState::RateLimited { until } => *until <= now,
            AccountState::InvalidCredentials => false,
        }
    }
}

/// Concurrent account-id → state map.
pub struct HealthRegistry {
    order: Vec<AccountId>,
    states: DashMap<AccountId, AccountState>,
}

impl HealthRegistry {
    /// Register `ids` (in pool order), all starting as `Available`.
    pub fn new(ids: impl IntoIterator<Item = AccountId>) -> Self {
        let order: Vec<AccountId> = ids.into_iter().collect();
        let states = order
            .iter()
            .map(|id| (*id, AccountState::Available))
            .collect();
        Self { order, states }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn state(&self, id: AccountId) -> Option<AccountState> {
        self.states.get(&id).map(|s| *s)
    }

    /// Record that `id` cannot be used until `until`.
    ///
    /// Overwrites an earlier reset time. Ignored for accounts already retired
    /// with invalid credentials.
    pub fn mark_rate_limited(&self, id: AccountId, until: SystemTime) {
        let Some(mut state) = self.states.get_mut(&id) else {
            warn!(account_id = %id, "rate limit reported for unknown account");
            return;
        };
        if *state == AccountState::InvalidCredentials {
            debug!(account_id = %id, "ignoring rate limit for invalidated account");
            return;
        }
        *state = AccountState::RateLimited { until };
        drop(state);

        info!(
            account_id = %id,
            reset_in_secs = secs_until(until, SystemTime::now()),
            "account rate limited"
        );
        counter!("forge_account_rate_limited_total").increment(1);
    }

    /// Retire `id` for the rest of the run. Returns true if this call changed
    /// its state.
    pub fn mark_invalid_credentials(&self, id: AccountId) -> bool {
        let Some(mut state) = self.states.get_mut(&id) else {
            warn!(account_id = %id, "invalid credentials reported for unknown account");
            return false;
        };
        if *state == AccountState::InvalidCredentials {
            return false;
        }
        *state = AccountState::InvalidCredentials;
        drop(state);

        warn!(account_id = %id, "account credentials invalid, retired until restart");
        counter!("forge_account_invalidations_total").increment(1);
        true
    }

    /// Whether `id` may serve a request now. Expired rate limits are cleared
    /// as a side effect.
    pub fn is_available(&self, id: AccountId) -> bool {
        let Some(mut state) = self.states.get_mut(&id) else {
            return false;
        };
        match *state {
            AccountState::Available => true,
            AccountState::RateLimited { until } if until <= SystemTime::now() => {
                *state = AccountState::Available;
                drop(state);
                info!(account_id = %id, "rate limit reset passed, account available again");
                true
            }
            AccountState::RateLimited { .. } | AccountState::InvalidCredentials => false,
        }
    }

    /// Clear every rate limit whose reset time has passed. Returns how many
    /// accounts came back.
    pub fn expire_all(&self) -> usize {
        self.order
            .iter()
            .filter(|id| matches!(self.state(**id), Some(AccountState::RateLimited { .. })))
            .filter(|id| self.is_available(**id))
            .count()
    }

    /// Accounts usable right now, counting expired rate limits as usable.
    /// Does not mutate.
    pub fn available_count(&self) -> usize {
        let now = SystemTime::now();
        self.states.iter().filter(|s| s.usable_at(now)).count()
    }

    /// Accounts whose credentials have not been rejected.
    pub fn valid_credential_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s != AccountState::InvalidCredentials)
            .count()
    }

    /// Accounts still inside a rate-limit window.
    pub fn rate_limited_count(&self) -> usize {
        let now = SystemTime::now();
        self.states
            .iter()
            .filter(|s| matches!(**s, AccountState::RateLimited { until } if until > now))
            .count()
    }

    /// Whether any account is usable now (lazily expiring as it goes).
    pub fn any_available(&self) -> bool {
        self.order.iter().any(|id| self.is_available(*id))
    }

    /// Whether any account other than `id` is usable now.
    pub fn any_available_except(&self, id: AccountId) -> bool {
        self.order
            .iter()
            .filter(|other| **other != id)
            .any(|other| self.is_available(*other))
    }

    /// Rate-limited account with the soonest reset. Ties go to the account
    /// earliest in pool order.
    pub fn earliest_reset(&self) -> Option<(AccountId, SystemTime)> {
        self.order
            .iter()
            .filter_map(|id| match self.state(*id)? {
                AccountState::RateLimited { until } => Some((*id, until)),
                _ => None,
            })
            .min_by_key(|(_, until)| *until)
    }

    /// Registry health summary.
    ///
    /// Status mapping: all accounts usable → healthy, some usable → degraded,
    /// none usable → unhealthy.
    pub fn health(&self) -> serde_json::Value {
        let now = SystemTime::now();
        let mut available = 0usize;
        let mut rate_limited = 0usize;
        let mut invalid = 0usize;

        let accounts: Vec<serde_json::Value> = self
            .order
            .iter()
            .filter_map(|id| self.state(*id).map(|s| (*id, s)))
            .map(|(id, state)| match state {
                AccountState::RateLimited { until } if until > now => {
                    rate_limited += 1;
                    serde_json::json!({
                        "id": id.get(),
                        "status": state.label(),
                        "reset_in_secs": secs_until(until, now),
                    })
                }
                AccountState::InvalidCredentials => {
                    invalid += 1;
                    serde_json::json!({ "id": id.get(), "status": state.label() })
                }
                _ => {
                    available += 1;
                    serde_json::json!({ "id": id.get(), "status": "available" })
                }
            })
            .collect();

        let total = self.order.len();
        let status = if available == total && total > 0 {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_rate_limited": rate_limited,
            "accounts_invalid": invalid,
            "accounts": accounts,
        })
    }

    /// Error body for `CredentialsExhausted`.
    pub fn exhausted_message(&self) -> String {
        serde_json::json!({
            "error": {
                "type": "credentials_exhausted",
                "message": "No account with valid credentials remains",
                "pool": {
                    "accounts_total": self.len(),
                    "accounts_available": self.available_count(),
                    "accounts_rate_limited": self.rate_limited_count(),
                    "accounts_invalid": self.len() - self.valid_credential_count(),
                }
            }
        })
        .to_string()
    }
}

fn secs_until(until: SystemTime, now: SystemTime) -> u64 {
    until
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
