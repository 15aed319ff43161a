//! Forge Ingest
//!
//! Batch job that pulls a repository's commits, issues, pull requests and
//! workflow runs from the forge REST API using a pool of accounts:
//! 1. Loads accounts and limits from TOML config
//! 2. Spreads requests over the pool, rotating when quota runs low
//! 3. Waits for the earliest reset when every account is drained
//! 4. Writes records as JSON lines (or just counts them)

mod config;
mod ingest;
mod metrics;
mod provider_impl;
mod status;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use forge_auth::TokenCache;
use forge_client::ForgeClient;
use forge_pool::{AccountAccess, AccountPool};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::ingest::{CountingSink, JsonLinesSink, RecordSink};
use crate::provider_impl::PoolAccessProvider;
use crate::status::StatusState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting forge-ingest");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let config_path = Config::resolve_path(flag_value(&args, "--config"));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let repository = config.repository(flag_value(&args, "--repo"))?;

    let job_id = uuid::Uuid::new_v4();
    let span = info_span!("job", job_id = %job_id.as_simple(), repository = %repository);
    run_job(config, repository, prometheus).instrument(span).await
}

async fn run_job(
    config: Config,
    repository: String,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<()> {
    info!(
        api_url = %config.forge.api_url,
        accounts = config.accounts.len(),
        requests_left_border = config.forge.requests_left_border,
        "configuration loaded"
    );

    let pool = AccountPool::new(config.credentials.clone())?;
    let access = Arc::new(AccountAccess::new(
        pool,
        config.access_settings(),
        config.limits(),
    ));

    let http = reqwest::Client::new();
    let options = config.client_options();
    let tokens = Arc::new(TokenCache::new(
        config.forge.api_url.clone(),
        http.clone(),
        options.timeout,
    ));
    let provider = Arc::new(PoolAccessProvider::new(access.clone(), tokens));
    let client = ForgeClient::new(http, options, provider);

    let cancel = access.cancellation_token();
    let status_stop = cancel.child_token();
    let status_task = match config.metrics.listen_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind to {addr}"))?;
            let state = StatusState {
                access: access.clone(),
                prometheus,
            };
            Some(tokio::spawn(status::serve(
                listener,
                state,
                status_stop.clone(),
            )))
        }
        None => None,
    };

    // A signal aborts any quota wait or retry delay in progress
    tokio::spawn({
        let access = access.clone();
        async move {
            shutdown_signal().await;
            access.cancel();
        }
    });

    let file_sink = config
        .job
        .output
        .as_ref()
        .map(|path| {
            File::create(path)
                .map(|f| JsonLinesSink::new(BufWriter::new(f)))
                .with_context(|| format!("failed to create output {}", path.display()))
        })
        .transpose()?;
    let sink: &dyn RecordSink = match file_sink {
        Some(ref sink) => sink,
        None => &CountingSink,
    };

    let result = ingest::run(&repository, &client, &access, sink).await;
    if let Some(ref sink) = file_sink {
        sink.flush()?;
    }

    status_stop.cancel();
    if let Some(task) = status_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "status endpoint failed"),
            Err(e) => error!(error = %e, "status endpoint task panicked"),
        }
    }

    match result {
        Ok(summary) => {
            info!(
                commits = summary.commits,
                issues = summary.issues,
                pull_requests = summary.pull_requests,
                workflow_runs = summary.workflow_runs,
                pages = summary.pages,
                skipped = ?summary.skipped,
                accounts_valid = access.valid_credential_count(),
                accounts_total = access.total_configured_accounts(),
                "ingestion complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                error = %e,
                progress = %access.progress_summary(),
                health = %access.health(),
                "ingestion failed"
            );
            Err(e)
        }
    }
}

/// Value following `flag` on the command line.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling"),
        _ = terminate => info!("received SIGTERM, cancelling"),
    }
}
