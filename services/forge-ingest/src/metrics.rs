//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` facade:
//!
//! - `forge_requests_total` (counter): label `status`
//! - `forge_request_duration_seconds` (histogram): label `status`
//! - `forge_account_rotations_total` (counter)
//! - `forge_account_rate_limited_total` (counter)
//! - `forge_account_invalidations_total` (counter)
//! - `forge_rate_limit_waits_total` (counter)
//!
//! This binary adds `forge_records_total` (counter, label `kind`).

use anyhow::{Context, Result};
use forge_pool::RecordKind;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const REQUEST_DURATION_BUCKETS: &[f64] = &[
    0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("forge_request_duration_seconds".to_string()),
            REQUEST_DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `forge_request_duration_seconds` gets explicit buckets so it renders as a
/// histogram rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Count records handed to the sink.
pub fn record_ingested(kind: RecordKind, count: u64) {
    metrics::counter!("forge_records_total", "kind" => kind.label()).increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; only one global recorder can exist
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_ingested(RecordKind::Issue, 3);
    }

    #[test]
    fn record_ingested_carries_kind_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_ingested(RecordKind::PullRequest, 100);
        record_ingested(RecordKind::PullRequest, 7);
        record_ingested(RecordKind::WorkflowRun, 1);

        let output = handle.render();
        assert!(
            output.contains("forge_records_total{kind=\"pull_requests\"} 107"),
            "got: {output}"
        );
        assert!(output.contains("kind=\"workflow_runs\""));
    }

    #[test]
    fn request_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("forge_request_duration_seconds", "status" => "200").record(0.2);

        let output = handle.render();
        assert!(output.contains("forge_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.025\""));
        assert!(output.contains("le=\"60\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn pool_counters_reach_the_recorder() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let registry = forge_pool::HealthRegistry::new([common::AccountId(1)]);
        registry.mark_rate_limited(
            common::AccountId(1),
            std::time::SystemTime::now() + std::time::Duration::from_secs(60),
        );
        registry.mark_invalid_credentials(common::AccountId(1));

        let output = handle.render();
        assert!(output.contains("forge_account_rate_limited_total 1"), "got: {output}");
        assert!(output.contains("forge_account_invalidations_total 1"), "got: {output}");
    }
}
