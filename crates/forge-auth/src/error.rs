//! Error types for credential operations

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("JWT signing failed: {0}")]
    Jwt(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
