//! Repository ingestion job
//!
//! Pages through a repository's commits, issues, pull requests and workflow
//! runs, handing every record to a sink. Each page fetch runs inside the
//! access layer's retry executor; rotation and quota waits happen below it
//! in the client hooks.

use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use forge_client::ForgeClient;
use forge_pool::{AccountAccess, RecordKind, RetryError};
use tracing::{debug, info, warn};

/// Page size requested from every listing endpoint.
pub const PER_PAGE: usize = 100;

/// Destination for ingested records.
pub trait RecordSink: Send + Sync {
    fn accept(&self, kind: RecordKind, record: &serde_json::Value) -> Result<()>;
}

/// Writes one `{"kind": ..., "record": ...}` JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn flush(&self) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("record sink poisoned"))?;
        out.flush().context("failed to flush records")
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn accept(&self, kind: RecordKind, record: &serde_json::Value) -> Result<()> {
        let line = serde_json::json!({ "kind": kind.label(), "record": record });
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("record sink poisoned"))?;
        serde_json::to_writer(&mut *out, &line).context("failed to encode record")?;
        out.write_all(b"\n").context("failed to write record")
    }
}

/// Discards records; the progress counters still see them.
pub struct CountingSink;

impl RecordSink for CountingSink {
    fn accept(&self, _kind: RecordKind, _record: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// What one run produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub workflow_runs: u64,
    pub pages: u64,
    /// Sources the forge reported as missing or disabled
    pub skipped: Vec<&'static str>,
}

impl IngestSummary {
    fn add(&mut self, kind: RecordKind, n: u64) {
        match kind {
            RecordKind::Commit => self.commits += n,
            RecordKind::Issue => self.issues += n,
            RecordKind::PullRequest => self.pull_requests += n,
            RecordKind::WorkflowRun => self.workflow_runs += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.commits + self.issues + self.pull_requests + self.workflow_runs
    }
}

struct Source {
    kind: RecordKind,
    /// Path below `repos/{owner}/{name}/`, query included
    path: &'static str,
    /// Array field holding the items, when the page is an object
    items_key: Option<&'static str>,
}

const SOURCES: [Source; 4] = [
    Source {
        kind: RecordKind::Commit,
        path: "commits?",
        items_key: None,
    },
    Source {
        kind: RecordKind::Issue,
        path: "issues?state=all&",
        items_key: None,
    },
    Source {
        kind: RecordKind::PullRequest,
        path: "pulls?state=all&",
        items_key: None,
    },
    Source {
        kind: RecordKind::WorkflowRun,
        path: "actions/runs?",
        items_key: Some("workflow_runs"),
    },
];

/// Ingest `repo` (`owner/name`) into `sink`.
///
/// Stops a source at the first short page or when its configured limit is
/// reached. A 404/410 for a source (feature disabled, no access) skips that
/// source; any other failure, credential exhaustion or cancellation aborts
/// the run.
pub async fn run(
    repo: &str,
    client: &ForgeClient,
    access: &AccountAccess,
    sink: &dyn RecordSink,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let cancel = access.cancellation_token();

    for source in &SOURCES {
        let kind = source.kind;
        let mut page = 1u64;

        loop {
            if cancel.is_cancelled() {
                bail!("ingestion cancelled");
            }
            if access.progress().limit_reached(kind) {
                info!(kind = kind.label(), "record limit reached");
                break;
            }

            let path = format!(
                "repos/{repo}/{}per_page={PER_PAGE}&page={page}",
                source.path
            );
            let body = match access
                .with_retry_if(|| client.get_json(&path), forge_client::Error::is_retryable)
                .await
            {
                Ok(body) => body,
                Err(RetryError::Failed(forge_client::Error::Status { status, .. }))
                    if status == 404 || status == 410 =>
                {
                    warn!(kind = kind.label(), status, "source unavailable, skipping");
                    summary.skipped.push(kind.label());
                    break;
                }
                Err(RetryError::Cancelled) => bail!("ingestion cancelled"),
                Err(RetryError::Failed(e)) => {
                    return Err(e).with_context(|| format!("failed to fetch {path}"));
                }
            };
            summary.pages += 1;

            let items = match source.items_key {
                Some(key) => body.get(key),
                None => Some(&body),
            }
            .and_then(|v| v.as_array())
            .with_context(|| format!("unexpected response shape for {path}"))?;

            // The issues listing also returns pull requests
            let records: Vec<&serde_json::Value> = items
                .iter()
                .filter(|item| kind != RecordKind::Issue || item.get("pull_request").is_none())
                .collect();
            let allowed = access
                .progress()
                .remaining(kind)
                .map_or(records.len(), |left| records.len().min(left as usize));

            let mut forwarded = 0u64;
            for item in records.into_iter().take(allowed) {
                sink.accept(kind, item)?;
                forwarded += 1;
            }

            access.progress().record(kind, forwarded);
            crate::metrics::record_ingested(kind, forwarded);
            summary.add(kind, forwarded);
            debug!(
                kind = kind.label(),
                page,
                items = items.len(),
                forwarded,
                "page ingested"
            );

            if items.len() < PER_PAGE {
                break;
            }
            page += 1;
        }

        info!(
            kind = kind.label(),
            total = access.progress().count(kind),
            progress = %access.progress_summary(),
            "source finished"
        );
    }

    Ok(summary)
}
