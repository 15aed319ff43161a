//! Error types for client and provider operations

/// Errors raised by an `AccessProvider`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No account with valid credentials remains
    #[error("credentials exhausted: {0}")]
    CredentialsExhausted(String),

    /// A blocking wait was cancelled
    #[error("cancelled while waiting for rate limit reset")]
    Cancelled,

    #[error("internal provider error: {0}")]
    Internal(String),
}

/// Errors from a forge API call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure (connect, timeout, broken body); worth one retry
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-success status the provider chose not to handle
    #[error("forge returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("gave up after {0} account rounds")]
    RoundsExhausted(u32),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Error {
    /// Whether another attempt could succeed. Exhausted credentials and
    /// cancellation are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Provider(ProviderError::CredentialsExhausted(_) | ProviderError::Cancelled)
        )
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
