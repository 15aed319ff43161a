//! Account credential material

use common::Secret;

/// One complete credential set for the forge API.
///
/// Accounts are either a personal access token or an app installation. The
/// app variant carries the PEM-encoded RSA private key used to sign JWTs; it
/// is only ever signed on behalf of the account that owns it.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token {
        token: Secret<String>,
    },
    App {
        app_id: u64,
        installation_id: u64,
        private_key: Secret<String>,
    },
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token {
            token: Secret::new(token.into()),
        }
    }

    pub fn app(app_id: u64, installation_id: u64, private_key: impl Into<String>) -> Self {
        Credentials::App {
            app_id,
            installation_id,
            private_key: Secret::new(private_key.into()),
        }
    }

    /// Credential kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Token { .. } => "token",
            Credentials::App { .. } => "app",
        }
    }

    /// Whether every field needed to authenticate is present.
    pub fn is_complete(&self) -> bool {
        match self {
            Credentials::Token { token } => !token.is_blank(),
            Credentials::App {
                app_id,
                installation_id,
                private_key,
            } => *app_id > 0 && *installation_id > 0 && !private_key.is_blank(),
        }
    }
}
