//! Error types for the access layer

/// Errors surfaced to the pipeline. Everything else (rotation, cooldown,
/// invalidation while alternatives remain) is handled internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Startup configuration named no complete account
    #[error("no usable account configured")]
    NoAccounts,

    /// Every account has invalid credentials; carries pool counts as JSON
    #[error("credentials exhausted: {0}")]
    CredentialsExhausted(String),

    /// A blocking wait or retry delay was cancelled
    #[error("cancelled while waiting for rate limit reset")]
    Cancelled,
}

/// Result alias for access layer operations.
pub type Result<T> = std::result::Result<T, Error>;
