//! Per-account authorization cache
//!
//! Maps account ids to `Authorization` header values. Token accounts need no
//! state; app accounts keep their current installation token here and repeat
//! the JWT exchange when it is about to expire. A tokio Mutex per cache
//! serializes exchanges so two concurrent callers never mint two tokens for
//! the same account.
//!
//! Nothing is persisted: a restart starts with an empty cache.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{AccountId, Secret};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::app::{exchange_installation_token, sign_app_jwt};
use crate::constants::TOKEN_REFRESH_MARGIN_SECS;
use crate::credentials::Credentials;
use crate::error::Result;

struct CachedToken {
    token: Secret<String>,
    expires_at: DateTime<Utc>,
}

/// Resolves header values for whichever account the caller selected.
pub struct TokenCache {
    api_url: String,
    http_client: reqwest::Client,
    exchange_timeout: std::time::Duration,
    tokens: Mutex<HashMap<AccountId, CachedToken>>,
}

impl TokenCache {
    /// `exchange_timeout` bounds each installation token request.
    pub fn new(
        api_url: impl Into<String>,
        http_client: reqwest::Client,
        exchange_timeout: std::time::Duration,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            http_client,
            exchange_timeout,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// `Authorization` header value for `account_id`, authenticating with
    /// `credentials` (the credentials of that same account).
    ///
    /// App accounts exchange a freshly signed JWT when no cached token exists
    /// or the cached one expires within 60 seconds. Exchange rejections
    /// surface as `Error::InvalidCredentials`.
    pub async fn authorization(
        &self,
        account_id: AccountId,
        credentials: &Credentials,
    ) -> Result<Secret<String>> {
        let (app_id, installation_id, private_key) = match credentials {
            Credentials::Token { token } => {
                return Ok(Secret::new(format!("token {}", token.expose())));
            }
            Credentials::App {
                app_id,
                installation_id,
                private_key,
            } => (*app_id, *installation_id, private_key),
        };

        let mut tokens = self.tokens.lock().await;
        let now = Utc::now();
        if let Some(cached) = tokens.get(&account_id)
            && cached.expires_at > now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)
        {
            return Ok(Secret::new(format!("Bearer {}", cached.token.expose())));
        }

        debug!(
            account_id = %account_id,
            app_id,
            installation_id,
            "exchanging app JWT for installation token"
        );
        let jwt = sign_app_jwt(app_id, private_key.expose(), now)?;
        let issued = exchange_installation_token(
            &self.http_client,
            &self.api_url,
            installation_id,
            &jwt,
            self.exchange_timeout,
        )
        .await?;
        info!(
            account_id = %account_id,
            expires_at = %issued.expires_at,
            "installation token issued"
        );

        let header = Secret::new(format!("Bearer {}", issued.token));
        tokens.insert(
            account_id,
            CachedToken {
                token: Secret::new(issued.token),
                expires_at: issued.expires_at,
            },
        );
        Ok(header)
    }

    /// Drop the cached token for an account (after the API rejected it).
    pub async fn invalidate(&self, account_id: AccountId) {
        if self.tokens.lock().await.remove(&account_id).is_some() {
            debug!(account_id = %account_id, "dropped cached installation token");
        }
    }

    /// Number of accounts with a cached installation token.
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PRIVATE_KEY: &str = include_str!("../testdata/app-key.pem");
    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

    /// Mock token endpoint counting exchanges and echoing the installation id
    /// into the issued token. `expires_at` controls the issued lifetime.
    async fn start_token_server(expires_at: &'static str) -> (String, Arc<AtomicUsize>) {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();
        let app = axum::Router::new().route(
            "/app/installations/{id}/access_tokens",
            axum::routing::post(
                move |axum::extract::Path(id): axum::extract::Path<u64>, _headers: HeaderMap| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if id == 403 {
                            return (StatusCode::FORBIDDEN, String::from("suspended"));
                        }
                        (
                            StatusCode::CREATED,
                            format!(r#"{{"token":"ghs_{id}_{n}","expires_at":"{expires_at}"}}"#),
                        )
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), exchanges)
    }

    #[tokio::test]
    async fn token_accounts_use_token_scheme() {
        let cache = TokenCache::new("http://127.0.0.1:1", reqwest::Client::new(), TIMEOUT);
        let header = cache
            .authorization(AccountId(1), &Credentials::token("ghp_abc"))
            .await
            .unwrap();
        assert_eq!(header.expose(), "token ghp_abc");
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn app_token_is_cached_until_near_expiry() {
        let (url, exchanges) = start_token_server("2099-01-01T00:00:00Z").await;
        let cache = TokenCache::new(url, reqwest::Client::new(), TIMEOUT);
        let creds = Credentials::app(7, 11, PRIVATE_KEY);

        let first = cache.authorization(AccountId(1), &creds).await.unwrap();
        let second = cache.authorization(AccountId(1), &creds).await.unwrap();

        assert_eq!(first.expose(), "Bearer ghs_11_0");
        assert_eq!(second.expose(), "Bearer ghs_11_0");
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiring_token_is_exchanged_again() {
        // Already expired on issue, so every call re-exchanges
        let (url, exchanges) = start_token_server("2000-01-01T00:00:00Z").await;
        let cache = TokenCache::new(url, reqwest::Client::new(), TIMEOUT);
        let creds = Credentials::app(7, 11, PRIVATE_KEY);

        cache.authorization(AccountId(1), &creds).await.unwrap();
        let again = cache.authorization(AccountId(1), &creds).await.unwrap();

        assert_eq!(again.expose(), "Bearer ghs_11_1");
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tokens_are_scoped_to_the_selected_account() {
        let (url, _) = start_token_server("2099-01-01T00:00:00Z").await;
        let cache = TokenCache::new(url, reqwest::Client::new(), TIMEOUT);

        let a = cache
            .authorization(AccountId(1), &Credentials::app(7, 11, PRIVATE_KEY))
            .await
            .unwrap();
        let b = cache
            .authorization(AccountId(2), &Credentials::app(8, 22, PRIVATE_KEY))
            .await
            .unwrap();

        assert!(a.expose().starts_with("Bearer ghs_11_"));
        assert!(b.expose().starts_with("Bearer ghs_22_"));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn invalidate_forces_new_exchange() {
        let (url, exchanges) = start_token_server("2099-01-01T00:00:00Z").await;
        let cache = TokenCache::new(url, reqwest::Client::new(), TIMEOUT);
        let creds = Credentials::app(7, 11, PRIVATE_KEY);

        cache.authorization(AccountId(1), &creds).await.unwrap();
        cache.invalidate(AccountId(1)).await;
        assert!(cache.is_empty().await);

        cache.authorization(AccountId(1), &creds).await.unwrap();
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_installation_is_invalid_credentials() {
        let (url, _) = start_token_server("2099-01-01T00:00:00Z").await;
        let cache = TokenCache::new(url, reqwest::Client::new(), TIMEOUT);

        let err = cache
            .authorization(AccountId(1), &Credentials::app(7, 403, PRIVATE_KEY))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidCredentials(_)), "got: {err}");
        assert!(cache.is_empty().await);
    }
}
