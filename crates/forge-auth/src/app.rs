//! App installation authentication
//!
//! Two steps, both scoped to a single account:
//! 1. Sign an RS256 JWT with the app's private key (`iss` = app id)
//! 2. POST it to `/app/installations/{id}/access_tokens` for an installation token
//!
//! The installation token is what authenticates ordinary API calls. It lives
//! for one hour; `TokenCache` decides when to repeat the exchange.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ACCEPT, API_VERSION, API_VERSION_HEADER, JWT_CLOCK_SKEW_SECS, JWT_LIFETIME_SECS, USER_AGENT,
};
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Installation token returned by the exchange endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Sign a JWT identifying the app.
///
/// `iat` is backdated by a minute to tolerate clock drift; `exp` stays under
/// the forge's ten-minute cap.
pub fn sign_app_jwt(app_id: u64, private_key_pem: &str, now: DateTime<Utc>) -> Result<String> {
    let claims = AppClaims {
        iat: now.timestamp() - JWT_CLOCK_SKEW_SECS,
        exp: now.timestamp() + JWT_LIFETIME_SECS,
        iss: app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| Error::InvalidCredentials(format!("unreadable app private key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| Error::Jwt(e.to_string()))
}

/// Exchange an app JWT for an installation access token.
///
/// 401/403 mean the app key or installation is no longer accepted and are
/// reported as `InvalidCredentials` so the caller can retire the account.
/// The whole exchange is bounded by `timeout`.
pub async fn exchange_installation_token(
    client: &reqwest::Client,
    api_url: &str,
    installation_id: u64,
    jwt: &str,
    timeout: Duration,
) -> Result<InstallationToken> {
    let url = format!(
        "{}/app/installations/{installation_id}/access_tokens",
        api_url.trim_end_matches('/')
    );
    let response = client
        .post(&url)
        .bearer_auth(jwt)
        .header(reqwest::header::ACCEPT, ACCEPT)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(API_VERSION_HEADER, API_VERSION)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Http(format!("installation token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "installation {installation_id} rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<InstallationToken>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid installation token response: {e}")))
}
