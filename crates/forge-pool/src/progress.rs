//! Per-record-type processing counters with optional limits
//!
//! Shared between the ingestion job (which records work) and the access
//! layer (which reports progress when it has to wait on quota).

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of record the job ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Commit,
    Issue,
    PullRequest,
    WorkflowRun,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Commit,
        RecordKind::Issue,
        RecordKind::PullRequest,
        RecordKind::WorkflowRun,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Commit => "commits",
            RecordKind::Issue => "issues",
            RecordKind::PullRequest => "pull_requests",
            RecordKind::WorkflowRun => "workflow_runs",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Maximum records per kind. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingLimits {
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub workflow_runs: u64,
}

impl ProcessingLimits {
    pub fn limit(&self, kind: RecordKind) -> Option<u64> {
        let limit = match kind {
            RecordKind::Commit => self.commits,
            RecordKind::Issue => self.issues,
            RecordKind::PullRequest => self.pull_requests,
            RecordKind::WorkflowRun => self.workflow_runs,
        };
        (limit > 0).then_some(limit)
    }
}

#[derive(Debug, Default)]
pub struct ProcessingProgress {
    counts: [AtomicU64; 4],
    limits: ProcessingLimits,
}

impl ProcessingProgress {
    pub fn new(limits: ProcessingLimits) -> Self {
        Self {
            counts: Default::default(),
            limits,
        }
    }

    pub fn limits(&self) -> ProcessingLimits {
        self.limits
    }

    /// Add `n` processed records of `kind`; returns the new total.
    pub fn record(&self, kind: RecordKind, n: u64) -> u64 {
        self.counts[kind.index()].fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn count(&self, kind: RecordKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Records of `kind` still allowed, or `None` when unlimited.
    pub fn remaining(&self, kind: RecordKind) -> Option<u64> {
        self.limits
            .limit(kind)
            .map(|limit| limit.saturating_sub(self.count(kind)))
    }

    pub fn limit_reached(&self, kind: RecordKind) -> bool {
        self.remaining(kind) == Some(0)
    }

    /// One-line summary, e.g. `commits=120/500 issues=40/unlimited ...`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for kind in RecordKind::ALL {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{}={}/", kind.label(), self.count(kind));
            match self.limits.limit(kind) {
                Some(limit) => {
                    let _ = write!(out, "{limit}");
                }
                None => out.push_str("unlimited"),
            }
        }
        out
    }
}
