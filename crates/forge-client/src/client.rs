//! Authenticated forge API client
//!
//! Issues JSON GETs against the forge REST API. Each call runs a bounded loop
//! of hook rounds: resolve account → pre-request quota check → send → on
//! failure, let the provider classify the response. Rotation and waiting are
//! entirely the provider's business; the client only replays the request
//! when told to.
//!
//! Transport errors are not retried here. Callers wrap whole calls in the
//! account layer's retry executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AccountId;
use dashmap::DashMap;
use forge_auth::{ACCEPT, API_VERSION, API_VERSION_HEADER, DEFAULT_API_URL, USER_AGENT};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::quota::{ErrorResponse, QuotaSnapshot};
use crate::{AccessProvider, ErrorDisposition, GateDecision};

/// Client settings, normally taken from the `[forge]` config section.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_url: String,
    pub timeout: Duration,
    /// Upper bound on authorize/gate/send rounds per call
    pub max_rounds: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_rounds: 32,
        }
    }
}

/// Forge REST client bound to an account provider.
pub struct ForgeClient {
    http: reqwest::Client,
    options: ClientOptions,
    provider: Arc<dyn AccessProvider>,
    /// Most recent quota snapshot per account, refreshed by every response
    snapshots: DashMap<AccountId, QuotaSnapshot>,
}

impl ForgeClient {
    pub fn new(
        http: reqwest::Client,
        options: ClientOptions,
        provider: Arc<dyn AccessProvider>,
    ) -> Self {
        Self {
            http,
            options,
            provider,
            snapshots: DashMap::new(),
        }
    }

    /// GET `path` (relative to the API base URL, query string included) and
    /// decode the JSON body.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/{}",
            self.options.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        for round in 0..self.options.max_rounds {
            let auth = self.provider.authorize().await?;
            let account_id = auth.account_id;

            // Copy out so no map guard is held across the hook's await
            let snapshot = self.snapshots.get(&account_id).map(|s| *s);
            if let Some(snapshot) = snapshot
                && self.provider.before_request(account_id, snapshot).await? == GateDecision::Retry
            {
                debug!(account_id = %account_id, round, "pre-request gate asked for re-resolution");
                continue;
            }

            let started = Instant::now();
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, auth.header.expose())
                .header(reqwest::header::ACCEPT, ACCEPT)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .header(API_VERSION_HEADER, API_VERSION)
                .timeout(self.options.timeout)
                .send()
                .await
                .map_err(|e| {
                    record_request("error", started.elapsed());
                    Error::Http(format!("GET {path} failed: {e}"))
                })?;

            let status = response.status();
            record_request(status.as_str(), started.elapsed());
            let headers = response.headers().clone();
            if let Some(snapshot) = QuotaSnapshot::from_headers(&headers) {
                self.snapshots.insert(account_id, snapshot);
            }

            if status.is_success() {
                return response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| Error::Decode(format!("GET {path}: {e}")));
            }

            let body = response.text().await.unwrap_or_default();
            let error = ErrorResponse::from_parts(status.as_u16(), &headers, &body);
            let truncated = error.body.clone();
            match self.provider.on_error(account_id, error).await? {
                ErrorDisposition::Retry => {
                    debug!(
                        account_id = %account_id,
                        status = status.as_u16(),
                        round,
                        "error hook handled failure, resending"
                    );
                }
                ErrorDisposition::Propagate => {
                    return Err(Error::Status {
                        status: status.as_u16(),
                        body: truncated,
                    });
                }
            }
        }

        warn!(
            max_rounds = self.options.max_rounds,
            "request abandoned after exhausting account rounds"
        );
        Err(Error::RoundsExhausted(self.options.max_rounds))
    }

    /// Last quota snapshot observed for an account.
    pub fn snapshot(&self, account_id: AccountId) -> Option<QuotaSnapshot> {
        self.snapshots.get(&account_id).map(|s| *s)
    }
}

fn record_request(status: &str, elapsed: Duration) {
    metrics::counter!("forge_requests_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("forge_request_duration_seconds", "status" => status.to_string())
        .record(elapsed.as_secs_f64());
}
