//! Immutable account pool

use common::AccountId;
use forge_auth::Credentials;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// One configured credential set with its stable id.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub credentials: Credentials,
}

/// Ordered, loaded-once list of accounts.
///
/// Ids follow configuration order starting at 1. The pool is never mutated
/// after construction and is shared read-only, so it needs no locking.
#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Account>,
}

impl AccountPool {
    /// Build the pool from configured credentials, in order.
    ///
    /// Incomplete entries are skipped with a warning but still consume an id,
    /// so ids match config positions. An empty result is a fatal
    /// configuration error.
    pub fn new(credentials: Vec<Credentials>) -> Result<Self> {
        let mut accounts = Vec::with_capacity(credentials.len());
        for (position, credentials) in credentials.into_iter().enumerate() {
            let id = AccountId(position as u32 + 1);
            if !credentials.is_complete() {
                warn!(account_id = %id, kind = credentials.kind(), "skipping incomplete account");
                continue;
            }
            accounts.push(Account { id, credentials });
        }

        if accounts.is_empty() {
            return Err(Error::NoAccounts);
        }

        let apps = accounts
            .iter()
            .filter(|a| matches!(a.credentials, Credentials::App { .. }))
            .count();
        info!(
            accounts = accounts.len(),
            tokens = accounts.len() - apps,
            apps,
            "account pool loaded"
        );
        Ok(Self { accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Always false for a constructed pool.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn first(&self) -> &Account {
        &self.accounts[0]
    }

    /// Account at a position in configured order. Panics when out of range.
    pub fn at(&self, index: usize) -> &Account {
        &self.accounts[index]
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn position(&self, id: AccountId) -> Option<usize> {
        self.accounts.iter().position(|a| a.id == id)
    }

    pub fn ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|a| a.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }
}
