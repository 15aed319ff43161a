//! Forge API client with account-management hooks
//!
//! Defines the `AccessProvider` trait that decouples request dispatch from
//! account management. The client never decides which credential to use or
//! whether to wait; it asks the provider before each request and reports each
//! failed response back to it:
//!
//! - `authorize` resolves the account to use right now and its header value
//! - `before_request` sees the last quota snapshot for that account
//! - `on_error` sees a failed response and decides retry vs propagate

pub mod client;
pub mod error;
pub mod quota;

pub use client::{ClientOptions, ForgeClient};
pub use error::{Error, ProviderError, Result};
pub use quota::{ErrorResponse, QuotaSnapshot, truncate_body};

use common::{AccountId, Secret};
use std::future::Future;
use std::pin::Pin;

/// What a failed response means for the account that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Credential rejected (401); the account is retired
    InvalidCredentials,
    /// Primary or secondary rate limit; the account cools down until reset
    QuotaExceeded,
    /// Not an account problem; propagated to the caller unchanged
    Other,
}

impl ErrorClassification {
    pub fn label(self) -> &'static str {
        match self {
            ErrorClassification::InvalidCredentials => "invalid_credentials",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::Other => "other",
        }
    }
}

/// Outcome of the pre-request quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Quota is fine, send the request
    Proceed,
    /// Re-resolve the account and check again before sending
    Retry,
}

/// Outcome of the post-response error hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Account state was updated; resend with a freshly resolved account
    Retry,
    /// Not handled here; surface the failure to the caller
    Propagate,
}

/// Resolved credential for one request.
#[derive(Debug)]
pub struct Authorization {
    pub account_id: AccountId,
    /// Full `Authorization` header value (`token …` or `Bearer …`)
    pub header: Secret<String>,
}

/// Boxed future returned by provider hooks.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = std::result::Result<T, ProviderError>> + Send + 'a>>;

/// Account management seen from the request path.
///
/// Uses boxed futures so the client can hold an `Arc<dyn AccessProvider>`.
pub trait AccessProvider: Send + Sync {
    /// The account to authenticate as right now. Never waits on quota.
    fn authorize(&self) -> HookFuture<'_, Authorization>;

    /// Pre-request quota check for `account_id`, given the most recent
    /// snapshot the client observed for it. May block until quota resets.
    fn before_request(&self, account_id: AccountId, quota: QuotaSnapshot)
    -> HookFuture<'_, GateDecision>;

    /// Post-response hook for a failed request sent as `account_id`.
    /// May block until quota resets.
    fn on_error(
        &self,
        account_id: AccountId,
        response: ErrorResponse,
    ) -> HookFuture<'_, ErrorDisposition>;
}
