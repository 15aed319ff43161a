//! Forge credential handling
//!
//! Turns configured account credentials into `Authorization` header values.
//! Personal access tokens are used as-is; app installations sign a short-lived
//! JWT with the app's private key and exchange it for an installation token.
//!
//! Token flow for app accounts:
//! 1. `TokenCache::authorization()` is asked for the currently selected account
//! 2. Cached installation token still valid → returned directly
//! 3. Otherwise `app::sign_app_jwt()` signs with *that account's* key
//! 4. `app::exchange_installation_token()` trades the JWT for a token
//! 5. The token is cached under the account id until shortly before expiry

pub mod app;
pub mod cache;
pub mod constants;
pub mod credentials;
pub mod error;

pub use app::{InstallationToken, exchange_installation_token, sign_app_jwt};
pub use cache::TokenCache;
pub use constants::*;
pub use credentials::Credentials;
pub use error::{Error, Result};
