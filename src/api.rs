// src/api.rs
//! Read-only HTTP surface for `serve`: health, status, metrics, and the
//! published artifacts.

use std::path::Path;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::metrics::Metrics;
use crate::store::{InsightStore, SignalStore};
use crate::trust::{TrustTable, TrustTier};

#[derive(Clone)]
pub struct AppState {
    pub signals: Arc<dyn SignalStore>,
    pub insights: Arc<dyn InsightStore>,
    pub trust: Arc<TrustTable>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub display_name: String,
    pub tier: TrustTier,
    pub signals: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_signals: usize,
    pub sources: Vec<SourceStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub latest_run_insights: Option<usize>,
    pub known_sources: usize,
}

/// Shared by `status` and `GET /status`.
pub async fn collect_status(
    signals: &dyn SignalStore,
    insights: &dyn InsightStore,
    trust: &TrustTable,
) -> anyhow::Result<StatusReport> {
    let counts = signals.count_by_source().await?;
    let latest = insights.latest_run().await?;

    let mut sources: Vec<SourceStatus> = counts
        .into_iter()
        .map(|(source, n)| {
            let d = trust.descriptor_of(&source);
            SourceStatus {
                tier: trust.tier_of(&source),
                display_name: d.display_name,
                source,
                signals: n,
            }
        })
        .collect();
    sources.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.source.cmp(&b.source)));

    Ok(StatusReport {
        total_signals: sources.iter().map(|s| s.signals).sum(),
        sources,
        last_run_at: latest.as_ref().map(|r| r.run_at),
        latest_run_insights: latest.as_ref().map(|r| r.insights.len()),
        known_sources: trust.len(),
    })
}

pub fn router(state: AppState, metrics: &Metrics, out_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .nest_service("/feed", ServeDir::new(out_dir))
        .with_state(state)
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, (StatusCode, String)> {
    collect_status(state.signals.as_ref(), state.insights.as_ref(), &state.trust)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(error = %e, "status lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        })
}
