//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Account secrets may sit inline in the TOML, but each one can instead name
//! an environment variable or a file so the TOML itself stays shareable.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use forge_auth::{Credentials, DEFAULT_API_URL};
use forge_client::ClientOptions;
use forge_pool::{AccessSettings, ProcessingLimits};
use serde::Deserialize;
use tracing::warn;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub forge: ForgeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
    /// Accounts with secrets resolved, in config order
    #[serde(skip)]
    pub credentials: Vec<Credentials>,
}

/// Forge API and access layer settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_left_border")]
    pub requests_left_border: u64,
    #[serde(default = "default_fallback_wait")]
    pub fallback_wait_secs: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout(),
            requests_left_border: default_requests_left_border(),
            fallback_wait_secs: default_fallback_wait(),
            max_rounds: default_max_rounds(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay(),
        }
    }
}

/// Per-record-type caps; 0 = unlimited
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default)]
    pub commits: u64,
    #[serde(default)]
    pub issues: u64,
    #[serde(default)]
    pub pull_requests: u64,
    #[serde(default)]
    pub workflow_runs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// `owner/name`; overridden by `--repo`
    #[serde(default)]
    pub repository: Option<String>,
    /// JSON-lines output file; records are only counted when absent
    #[serde(default)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serves `/health` and `/metrics` when set
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// One `[[accounts]]` entry as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountEntry {
    #[serde(default)]
    pub token: Option<Secret<String>>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub installation_id: Option<u64>,
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub private_key_env: Option<String>,
}

impl AccountEntry {
    fn is_app(&self) -> bool {
        self.app_id.is_some()
            || self.installation_id.is_some()
            || self.private_key_file.is_some()
            || self.private_key_env.is_some()
    }

    /// Resolve secrets into credentials.
    ///
    /// A variable that is unset yields blank material (the pool skips the
    /// account); an unreadable file is a configuration error.
    fn resolve(&self, position: usize) -> common::Result<Credentials> {
        if self.is_app() {
            let private_key = if let Some(ref path) = self.private_key_file {
                read_secret_file(path, "private_key_file")?
            } else {
                env_secret(self.private_key_env.as_deref(), position)
            };
            return Ok(Credentials::app(
                self.app_id.unwrap_or(0),
                self.installation_id.unwrap_or(0),
                private_key,
            ));
        }

        let token = if let Some(ref token) = self.token {
            token.expose().trim().to_owned()
        } else if self.token_env.is_some() {
            env_secret(self.token_env.as_deref(), position)
        } else if let Some(ref path) = self.token_file {
            read_secret_file(path, "token_file")?
        } else {
            String::new()
        };
        Ok(Credentials::token(token))
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_requests_left_border() -> u64 {
    100
}

fn default_fallback_wait() -> u64 {
    3600
}

fn default_max_rounds() -> u32 {
    32
}

fn default_retry_delay() -> u64 {
    5000
}

fn read_secret_file(path: &Path, field: &str) -> common::Result<String> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read {field} {}: {e}", path.display()))
    })?;
    Ok(contents.trim().to_owned())
}

fn env_secret(var: Option<&str>, position: usize) -> String {
    let Some(var) = var else {
        return String::new();
    };
    match std::env::var(var) {
        Ok(value) => value.trim().to_owned(),
        Err(_) => {
            warn!(account = position + 1, var, "account secret variable not set");
            String::new()
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then resolve account secrets.
    ///
    /// Secret resolution per account:
    /// 1. `token` inline
    /// 2. `token_env` variable
    /// 3. `token_file` contents
    ///
    /// App accounts read their key from `private_key_file` or
    /// `private_key_env`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.forge.api_url.starts_with("http://")
            && !config.forge.api_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_url must start with http:// or https://, got: {}",
                config.forge.api_url
            )));
        }

        if config.forge.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.forge.max_rounds == 0 {
            return Err(common::Error::Config(
                "max_rounds must be greater than 0".into(),
            ));
        }

        if let Some(ref repo) = config.job.repository {
            validate_repository(repo)?;
        }

        config.credentials = config
            .accounts
            .iter()
            .enumerate()
            .map(|(position, entry)| entry.resolve(position))
            .collect::<common::Result<_>>()?;

        if !config.credentials.iter().any(Credentials::is_complete) {
            return Err(common::Error::Config(format!(
                "no usable account: {} configured, none with complete credentials",
                config.accounts.len()
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("forge-ingest.toml")
    }

    /// Repository to ingest: `--repo` wins over `[job].repository`.
    pub fn repository(&self, cli_repo: Option<&str>) -> common::Result<String> {
        let repo = cli_repo
            .map(str::to_owned)
            .or_else(|| self.job.repository.clone())
            .ok_or_else(|| {
                common::Error::Config("no repository given (--repo or [job].repository)".into())
            })?;
        validate_repository(&repo)?;
        Ok(repo)
    }

    pub fn access_settings(&self) -> AccessSettings {
        AccessSettings {
            requests_left_border: self.forge.requests_left_border,
            fallback_wait: Duration::from_secs(self.forge.fallback_wait_secs),
            retry_delay: Duration::from_millis(self.retry.delay_ms),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_url: self.forge.api_url.clone(),
            timeout: Duration::from_secs(self.forge.timeout_secs),
            max_rounds: self.forge.max_rounds,
        }
    }

    pub fn limits(&self) -> ProcessingLimits {
        ProcessingLimits {
            commits: self.limits.commits,
            issues: self.limits.issues,
            pull_requests: self.limits.pull_requests,
            workflow_runs: self.limits.workflow_runs,
        }
    }
}

fn validate_repository(repo: &str) -> common::Result<()> {
    let valid = matches!(
        repo.split_once('/'),
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
    );
    if !valid {
        return Err(common::Error::Config(format!(
            "repository must look like owner/name, got: {repo}"
        )));
    }
    Ok(())
}
