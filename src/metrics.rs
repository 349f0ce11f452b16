// src/metrics.rs
use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("signals_fetched_total", "Signals parsed from providers.");
        describe_counter!(
            "signals_inserted_total",
            "Signals newly stored (duplicates excluded)."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when ingest last ran.");
        describe_counter!("analysis_runs_total", "Analysis and research runs started.");
        describe_counter!(
            "synthesis_failures_total",
            "Runs aborted by synthesis or format errors."
        );
        describe_counter!("insights_persisted_total", "Insights saved to the store.");
        describe_counter!(
            "priority_downgrades_total",
            "p0 claims demoted for missing the convergence floor."
        );
        describe_histogram!("synthesis_ms", "Synthesis round-trip in milliseconds.");
        describe_gauge!(
            "last_analysis_run_ts",
            "Unix ts of the last persisted analysis run."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Handle backed by a recorder that is not installed globally. Renders
    /// an empty exposition; used by tests and by `serve` when a recorder
    /// already exists.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
