//! Current-account selection
//!
//! Keeps a pointer to the account in use and moves it forward, in pool order,
//! only when that account becomes unusable. Unlike round-robin, a healthy
//! current account keeps serving every request so its quota drains first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::counter;
use tracing::{debug, info, warn};

use crate::account::{Account, AccountPool};
use crate::health::HealthRegistry;

pub struct RotationPolicy {
    pool: Arc<AccountPool>,
    registry: Arc<HealthRegistry>,
    /// Index into the pool; `None` until the first selection
    current: Mutex<Option<usize>>,
}

impl RotationPolicy {
    pub fn new(pool: Arc<AccountPool>, registry: Arc<HealthRegistry>) -> Self {
        Self {
            pool,
            registry,
            current: Mutex::new(None),
        }
    }

    /// Account to use right now.
    ///
    /// A single-account pool always returns that account (after lazily
    /// expiring its rate limit); the quota gate is what holds requests back.
    /// Otherwise the current account is kept while usable and rotated away
    /// from when it is not.
    pub fn select_current(&self) -> &Account {
        let mut current = self.lock();

        if self.pool.len() == 1 {
            let account = self.pool.first();
            self.registry.is_available(account.id);
            *current = Some(0);
            return account;
        }

        let index = *current.get_or_insert(0);
        let account = self.pool.at(index);
        if self.registry.is_available(account.id) {
            return account;
        }

        debug!(account_id = %account.id, "current account unusable, rotating");
        self.rotate_locked(&mut current)
    }

    /// Move to the next usable account after the current one.
    ///
    /// Scans in pool order with wrap-around. If nothing is usable, expired
    /// rate limits are cleared and the scan repeats. If still nothing, falls
    /// back to the valid-credential account with the earliest reset (or the
    /// first account when none are valid) without touching its state; the
    /// caller decides whether to wait or fail.
    pub fn rotate_to_next(&self) -> &Account {
        let mut current = self.lock();
        self.rotate_locked(&mut current)
    }

    /// Id of the account the pointer is on, if any selection happened yet.
    pub fn current_id(&self) -> Option<common::AccountId> {
        let current = *self.lock();
        current.map(|index| self.pool.at(index).id)
    }

    fn rotate_locked(&self, current: &mut Option<usize>) -> &Account {
        let start = current.map_or(0, |index| (index + 1) % self.pool.len());

        if let Some(index) = self.scan(start) {
            return self.switch(current, index);
        }

        let expired = self.registry.expire_all();
        if expired > 0 {
            debug!(expired, "expired rate limits cleared during rotation");
            if let Some(index) = self.scan(start) {
                return self.switch(current, index);
            }
        }

        let index = self.fallback_index();
        warn!(
            account_id = %self.pool.at(index).id,
            valid = self.registry.valid_credential_count(),
            total = self.pool.len(),
            "no usable account, falling back to earliest reset"
        );
        self.switch(current, index)
    }

    fn scan(&self, start: usize) -> Option<usize> {
        let n = self.pool.len();
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|index| self.registry.is_available(self.pool.at(*index).id))
    }

    fn fallback_index(&self) -> usize {
        self.registry
            .earliest_reset()
            .and_then(|(id, _)| self.pool.position(id))
            .unwrap_or(0)
    }

    fn switch(&self, current: &mut Option<usize>, index: usize) -> &Account {
        let account = self.pool.at(index);
        if *current != Some(index) {
            let from = current.map(|i| self.pool.at(i).id.to_string());
            info!(
                from = from.as_deref().unwrap_or("none"),
                to = %account.id,
                "rotated account"
            );
            counter!("forge_account_rotations_total").increment(1);
            *current = Some(index);
        }
        account
    }

    fn lock(&self) -> MutexGuard<'_, Option<usize>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::AccountState;
    use common::AccountId;
    use forge_auth::Credentials;
    use std::time::{Duration, SystemTime};

    fn setup(n: usize) -> (RotationPolicy, Arc<HealthRegistry>) {
        let pool = Arc::new(
            AccountPool::new((0..n).map(|i| Credentials::token(format!("t{i}"))).collect())
                .unwrap(),
        );
        let registry = Arc::new(HealthRegistry::new(pool.ids()));
        (RotationPolicy::new(pool, registry.clone()), registry)
    }

    fn later(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(secs)
    }

    #[test]
    fn starts_on_first_account_and_stays() {
        let (policy, _) = setup(3);
        assert!(policy.current_id().is_none());
        assert_eq!(policy.select_current().id, AccountId(1));
        assert_eq!(policy.select_current().id, AccountId(1));
        assert_eq!(policy.current_id(), Some(AccountId(1)));
    }

    #[test]
    fn unusable_current_rotates_forward() {
        let (policy, registry) = setup(3);
        policy.select_current();
        registry.mark_rate_limited(AccountId(1), later(60));
        assert_eq!(policy.select_current().id, AccountId(2));
        // Account 1 recovering does not pull the pointer back
        registry.mark_rate_limited(AccountId(1), SystemTime::now());
        assert_eq!(policy.select_current().id, AccountId(2));
    }

    #[test]
    fn rotation_wraps_around() {
        let (policy, registry) = setup(3);
        policy.select_current();
        policy.rotate_to_next();
        assert_eq!(policy.rotate_to_next().id, AccountId(3));
        registry.mark_invalid_credentials(AccountId(3));
        assert_eq!(policy.select_current().id, AccountId(1));
    }

    #[test]
    fn rotation_visits_every_healthy_account_once() {
        let (policy, _) = setup(4);
        assert_eq!(policy.select_current().id, AccountId(1));
        let visited: Vec<u32> = (0..4).map(|_| policy.rotate_to_next().id.get()).collect();
        assert_eq!(visited, vec![2, 3, 4, 1]);
        assert_eq!(policy.rotate_to_next().id, AccountId(2));
    }

    #[test]
    fn rotation_skips_unusable_accounts() {
        let (policy, registry) = setup(4);
        policy.select_current();
        registry.mark_rate_limited(AccountId(2), later(60));
        registry.mark_invalid_credentials(AccountId(3));
        assert_eq!(policy.rotate_to_next().id, AccountId(4));
    }

    #[test]
    fn rotation_picks_up_expired_limits() {
        let (policy, registry) = setup(2);
        policy.select_current();
        registry.mark_rate_limited(AccountId(1), later(60));
        registry.mark_rate_limited(AccountId(2), SystemTime::now() - Duration::from_secs(1));
        assert_eq!(policy.select_current().id, AccountId(2));
        assert_eq!(registry.state(AccountId(2)), Some(AccountState::Available));
    }

    #[test]
    fn exhausted_pool_falls_back_to_earliest_reset() {
        let (policy, registry) = setup(3);
        policy.select_current();
        let soonest = later(5);
        registry.mark_rate_limited(AccountId(1), later(10));
        registry.mark_rate_limited(AccountId(2), soonest);
        registry.mark_invalid_credentials(AccountId(3));

        assert_eq!(policy.rotate_to_next().id, AccountId(2));
        // Fallback does not clear the limit
        assert_eq!(
            registry.state(AccountId(2)),
            Some(AccountState::RateLimited { until: soonest })
        );
        assert_eq!(policy.select_current().id, AccountId(2));
    }

    #[test]
    fn all_invalid_falls_back_to_first() {
        let (policy, registry) = setup(2);
        registry.mark_invalid_credentials(AccountId(1));
        registry.mark_invalid_credentials(AccountId(2));
        assert_eq!(policy.select_current().id, AccountId(1));
    }

    #[test]
    fn single_account_is_always_returned() {
        let (policy, registry) = setup(1);
        registry.mark_rate_limited(AccountId(1), later(60));
        assert_eq!(policy.select_current().id, AccountId(1));
        registry.mark_invalid_credentials(AccountId(1));
        assert_eq!(policy.select_current().id, AccountId(1));
    }

    #[test]
    fn single_account_expires_lazily() {
        let (policy, registry) = setup(1);
        registry.mark_rate_limited(AccountId(1), SystemTime::now() - Duration::from_secs(1));
        policy.select_current();
        assert_eq!(registry.state(AccountId(1)), Some(AccountState::Available));
    }
}
