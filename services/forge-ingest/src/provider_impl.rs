//! Pool-backed access provider
//!
//! Implements the client's `AccessProvider` hooks on top of the account
//! access layer and the per-account token cache. App installation tokens are
//! always minted with the key of the account the rotation policy selected.

use std::sync::Arc;

use common::AccountId;
use forge_auth::TokenCache;
use forge_client::{
    AccessProvider, Authorization, ErrorDisposition, ErrorResponse, GateDecision, HookFuture,
    ProviderError, QuotaSnapshot,
};
use forge_pool::{AccountAccess, AccountState};
use tracing::{debug, warn};

pub struct PoolAccessProvider {
    access: Arc<AccountAccess>,
    tokens: Arc<TokenCache>,
}

impl PoolAccessProvider {
    pub fn new(access: Arc<AccountAccess>, tokens: Arc<TokenCache>) -> Self {
        Self { access, tokens }
    }
}

fn provider_error(err: forge_pool::Error) -> ProviderError {
    match err {
        forge_pool::Error::CredentialsExhausted(msg) => ProviderError::CredentialsExhausted(msg),
        forge_pool::Error::Cancelled => ProviderError::Cancelled,
        other => ProviderError::Internal(other.to_string()),
    }
}

impl PoolAccessProvider {
    async fn resolve_current(&self) -> Result<Authorization, ProviderError> {
        // Each rejected exchange retires one account, so this ends
        // within one pass over the pool
        for _ in 0..self.access.total_configured_accounts() {
            if self.access.valid_credential_count() == 0 {
                break;
            }
            let account = self.access.current_account();
            match self
                .tokens
                .authorization(account.id, &account.credentials)
                .await
            {
                Ok(header) => {
                    return Ok(Authorization {
                        account_id: account.id,
                        header,
                    });
                }
                Err(forge_auth::Error::InvalidCredentials(msg)) => {
                    warn!(
                        account_id = %account.id,
                        error = %msg,
                        "app token exchange rejected"
                    );
                    self.access
                        .mark_invalid_credentials(account.id)
                        .map_err(provider_error)?;
                }
                Err(e) => return Err(ProviderError::Internal(e.to_string())),
            }
        }
        Err(ProviderError::CredentialsExhausted(
            self.access.registry().exhausted_message(),
        ))
    }
}

impl AccessProvider for PoolAccessProvider {
    /// Never hands out a retired account, and gives up as soon as the
    /// access layer is cancelled, even mid token exchange.
    fn authorize(&self) -> HookFuture<'_, Authorization> {
        Box::pin(async move {
            let cancel = self.access.cancellation_token();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                result = self.resolve_current() => result,
            }
        })
    }

    fn before_request(
        &self,
        account_id: AccountId,
        quota: QuotaSnapshot,
    ) -> HookFuture<'_, GateDecision> {
        Box::pin(async move {
            self.access
                .preflight(account_id, quota)
                .await
                .map_err(provider_error)
        })
    }

    fn on_error(
        &self,
        account_id: AccountId,
        response: ErrorResponse,
    ) -> HookFuture<'_, ErrorDisposition> {
        Box::pin(async move {
            let result = self.access.handle_error(account_id, &response).await;
            if self.access.registry().state(account_id) == Some(AccountState::InvalidCredentials) {
                debug!(account_id = %account_id, "dropping token of retired account");
                self.tokens.invalidate(account_id).await;
            }
            result.map_err(provider_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use forge_auth::Credentials;
    use forge_client::{ClientOptions, ForgeClient};
    use forge_pool::{AccessSettings, AccountPool, ProcessingLimits};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn access(credentials: Vec<Credentials>) -> Arc<AccountAccess> {
        Arc::new(AccountAccess::new(
            AccountPool::new(credentials).unwrap(),
            AccessSettings {
                retry_delay: Duration::from_millis(10),
                ..AccessSettings::default()
            },
            ProcessingLimits::default(),
        ))
    }

    fn provider(url: &str, access: Arc<AccountAccess>) -> Arc<PoolAccessProvider> {
        Arc::new(PoolAccessProvider::new(
            access,
            Arc::new(TokenCache::new(
                url,
                reqwest::Client::new(),
                Duration::from_secs(30),
            )),
        ))
    }

    fn client(url: &str, provider: Arc<PoolAccessProvider>) -> ForgeClient {
        ForgeClient::new(
            reqwest::Client::new(),
            ClientOptions {
                api_url: url.to_string(),
                timeout: Duration::from_secs(5),
                max_rounds: 8,
            },
            provider,
        )
    }

    fn reset_in(secs: u64) -> String {
        (SystemTime::now() + Duration::from_secs(secs))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    /// Mock forge: `token revoked` is rejected, `token low` reports an
    /// almost-drained quota, installation exchanges are always refused.
    async fn start_forge(hits: Arc<AtomicU32>) -> String {
        let app = axum::Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let mut quota = HeaderMap::new();
                let remaining = if auth == "token low" { "5" } else { "4000" };
                quota.insert("x-ratelimit-remaining", remaining.parse().unwrap());
                quota.insert("x-ratelimit-limit", "5000".parse().unwrap());
                quota.insert("x-ratelimit-reset", reset_in(600).parse().unwrap());

                if uri.path().ends_with("/access_tokens") {
                    return (
                        StatusCode::UNAUTHORIZED,
                        HeaderMap::new(),
                        String::from(r#"{"message":"A JSON web token could not be decoded"}"#),
                    );
                }
                match auth.as_str() {
                    "token revoked" => (
                        StatusCode::UNAUTHORIZED,
                        HeaderMap::new(),
                        String::from(r#"{"message":"Bad credentials"}"#),
                    ),
                    _ => (
                        StatusCode::OK,
                        quota,
                        serde_json::json!({ "auth": auth }).to_string(),
                    ),
                }
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn authorize_uses_current_token_account() {
        let access = access(vec![Credentials::token("one"), Credentials::token("two")]);
        let provider = provider("http://127.0.0.1:9", access);
        let auth = provider.authorize().await.unwrap();
        assert_eq!(auth.account_id, AccountId(1));
        assert_eq!(auth.header.expose(), "token one");
    }

    #[tokio::test]
    async fn rejected_app_exchange_moves_to_next_account() {
        let url = start_forge(Arc::new(AtomicU32::new(0))).await;
        let pem = include_str!("../../../crates/forge-auth/testdata/app-key.pem");
        let access = access(vec![Credentials::app(1, 2, pem), Credentials::token("two")]);
        let provider = provider(&url, access.clone());

        let auth = provider.authorize().await.unwrap();
        assert_eq!(auth.account_id, AccountId(2));
        assert_eq!(
            access.registry().state(AccountId(1)),
            Some(AccountState::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn all_exchanges_rejected_is_credentials_exhausted() {
        let url = start_forge(Arc::new(AtomicU32::new(0))).await;
        let pem = include_str!("../../../crates/forge-auth/testdata/app-key.pem");
        let access = access(vec![Credentials::app(1, 2, pem)]);
        let provider = provider(&url, access);

        let err = provider.authorize().await.unwrap_err();
        assert!(matches!(err, ProviderError::CredentialsExhausted(_)));
    }

    #[tokio::test]
    async fn retired_pool_is_not_authorized() {
        let hits = Arc::new(AtomicU32::new(0));
        let url = start_forge(hits.clone()).await;
        let access = access(vec![Credentials::token("r1"), Credentials::token("r2")]);
        access.registry().mark_invalid_credentials(AccountId(1));
        access.registry().mark_invalid_credentials(AccountId(2));
        let provider = provider(&url, access);

        let err = provider.authorize().await.unwrap_err();
        assert!(matches!(err, ProviderError::CredentialsExhausted(_)));

        let err = client(&url, provider).get_json("repos/o/r/issues").await.unwrap_err();
        assert!(matches!(
            err,
            forge_client::Error::Provider(ProviderError::CredentialsExhausted(_))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_stalled_exchange() {
        // Token endpoint that accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        let pem = include_str!("../../../crates/forge-auth/testdata/app-key.pem");
        let access = access(vec![Credentials::app(1, 2, pem)]);
        let provider = provider(&url, access.clone());

        let pending = tokio::spawn({
            let provider = provider.clone();
            async move { provider.authorize().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        access.cancel();

        let result = tokio::time::timeout(Duration::from_secs(3), pending)
            .await
            .expect("authorize ignored cancellation")
            .unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(access.valid_credential_count(), 1);
    }

    #[tokio::test]
    async fn revoked_token_fails_over_transparently() {
        let hits = Arc::new(AtomicU32::new(0));
        let url = start_forge(hits.clone()).await;
        let access = access(vec![Credentials::token("revoked"), Credentials::token("good")]);
        let client = client(&url, provider(&url, access.clone()));

        let body = client.get_json("repos/o/r/issues").await.unwrap();
        assert_eq!(body["auth"], "token good");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(access.valid_credential_count(), 1);
        assert_eq!(access.current_account().id, AccountId(2));
    }

    #[tokio::test]
    async fn drained_quota_rotates_before_next_request() {
        let url = start_forge(Arc::new(AtomicU32::new(0))).await;
        let access = access(vec![Credentials::token("low"), Credentials::token("fresh")]);
        let client = client(&url, provider(&url, access.clone()));

        let first = client.get_json("repos/o/r/pulls").await.unwrap();
        assert_eq!(first["auth"], "token low");

        // Snapshot says 5 left (border is 100): the gate parks account 1
        let second = client.get_json("repos/o/r/pulls").await.unwrap();
        assert_eq!(second["auth"], "token fresh");
        assert!(matches!(
            access.registry().state(AccountId(1)),
            Some(AccountState::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn unrelated_errors_propagate() {
        let url = start_forge(Arc::new(AtomicU32::new(0))).await;
        let access = access(vec![Credentials::token("only")]);
        let provider = provider(&url, access.clone());

        let disposition = provider
            .on_error(AccountId(1), ErrorResponse::new(422, "Validation Failed"))
            .await
            .unwrap();
        assert_eq!(disposition, ErrorDisposition::Propagate);
        assert_eq!(access.available_account_count(), 1);
    }
}
