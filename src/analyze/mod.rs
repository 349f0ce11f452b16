// src/analyze/mod.rs
//! Analysis pipeline entry: velocity → prompt → synthesis → validation →
//! convergence → persistence, composed into one run.
//!
//! Order of one `run_analysis` pass:
//! 1) velocity over two adjacent windows ending at `run_at` (failure is non-fatal)
//! 2) signals after the last persisted run (or one window back), up to `run_at`
//! 3) prompt compilation against the shared trust table
//! 4) synthesis, time-boxed by the engine
//! 5) validation with the destination's supported kinds
//! 6) convergence enrichment, then one atomic `save_run`

pub mod convergence;
pub mod prompt;
pub mod synthesis;
pub mod validator;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::time::Instant;

use crate::ingest::types::Signal;
use crate::insight::EnrichedInsight;
use crate::metrics::ensure_metrics_described;
use crate::store::{InsightStore, SignalStore};
use crate::trust::TrustTable;
use crate::velocity::{compute_velocity, score_windows, window_start, VelocityScore};

// Re-export convenient types.
pub use crate::analyze::convergence::{enrich, enrich_all};
pub use crate::analyze::prompt::{CompiledPrompt, PromptCompiler, TemplateKind};
pub use crate::analyze::synthesis::{DynEngine, SynthesisEngine, SynthesisError};
pub use crate::analyze::validator::{ParseOutcome, SynthesisFormatError, Validator};

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Velocity window length; also the look-back when no run exists yet.
    pub window: Duration,
    /// Background notes appended under the time-uncertain heading.
    pub knowledge: Option<String>,
    /// Reference time. `None` means now.
    pub now: Option<DateTime<Utc>>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window: Duration::hours(24),
            knowledge: None,
            now: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchOptions {
    pub topic: String,
    pub lookback: Duration,
    pub knowledge: Option<String>,
    pub now: Option<DateTime<Utc>>,
}

/// Outcome of one run. Zero signals or zero insights are valid outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub signals: usize,
    pub hot_topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateKind>,
    pub insights: Vec<EnrichedInsight>,
    /// p0 claims demoted for missing the convergence floor.
    pub downgraded: usize,
    /// Validator coercions. Informational.
    pub notes: Vec<String>,
    pub persisted: bool,
    pub errors: Vec<String>,
}

impl RunReport {
    fn new(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at,
            elapsed_ms: 0,
            signals: 0,
            hot_topics: Vec::new(),
            template: None,
            insights: Vec::new(),
            downgraded: 0,
            notes: Vec::new(),
            persisted: false,
            errors: Vec::new(),
        }
    }

    fn finish(mut self, t0: Instant) -> Self {
        self.elapsed_ms = t0.elapsed().as_millis() as u64;
        self
    }
}

/// One analysis run. Never fails as a whole: every problem lands in
/// `RunReport::errors`, and a failed synthesis persists nothing.
pub async fn run_analysis<S, I>(
    signals: &S,
    insights: &I,
    engine: &dyn SynthesisEngine,
    trust: &TrustTable,
    opts: &AnalysisOptions,
) -> RunReport
where
    S: SignalStore + ?Sized,
    I: InsightStore + ?Sized,
{
    ensure_metrics_described();
    counter!("analysis_runs_total").increment(1);

    let t0 = Instant::now();
    let run_at = opts.now.unwrap_or_else(Utc::now);
    let mut report = RunReport::new(run_at);

    // (1) Velocity
    let scores = match compute_velocity(signals, opts.window, run_at).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "velocity unavailable, continuing without hot topics");
            report.errors.push(format!("velocity: {e}"));
            Vec::new()
        }
    };
    report.hot_topics = hot_topic_names(&scores);

    // (2) Batch since the last run. A signal stamped exactly at the previous
    // `run_at` already belonged to that run.
    let (since, after_last_run) = match signals.last_run_timestamp().await {
        Ok(Some(t)) => (t, true),
        Ok(None) => (window_start(run_at, opts.window), false),
        Err(e) => {
            report.errors.push(format!("last run lookup: {e}"));
            (window_start(run_at, opts.window), false)
        }
    };
    let batch: Vec<Signal> = match signals.query_since(since).await {
        Ok(v) => v
            .into_iter()
            .filter(|s| {
                s.observed_at <= run_at && (!after_last_run || s.observed_at > since)
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "signal query failed");
            report.errors.push(format!("signal query: {e}"));
            Vec::new()
        }
    };
    report.signals = batch.len();
    if batch.is_empty() {
        tracing::info!(since = %since, "no new signals, skipping synthesis");
        return report.finish(t0);
    }

    // (3) Prompt
    let compiled = PromptCompiler::new(trust).compile(&batch, &scores, opts.knowledge.as_deref());
    report.template = Some(compiled.template);

    // (4)–(6)
    let Some(parsed) = synthesize_and_parse(
        engine,
        &compiled,
        &Validator::new(insights.supported_kinds()),
        &mut report,
    )
    .await
    else {
        return report.finish(t0);
    };
    let enriched = enrich_all(parsed.insights, trust);
    report.downgraded = enriched.iter().filter(|e| e.audit().suspect).count();

    match insights.save_run(run_at, &enriched).await {
        Ok(()) => {
            report.persisted = true;
            counter!("insights_persisted_total").increment(enriched.len() as u64);
            gauge!("last_analysis_run_ts").set(run_at.timestamp() as f64);
        }
        Err(e) => {
            tracing::error!(error = %e, "persisting run failed");
            report.errors.push(format!("persist: {e}"));
        }
    }
    report.insights = enriched;

    let report = report.finish(t0);
    tracing::info!(
        signals = report.signals,
        hot = report.hot_topics.len(),
        insights = report.insights.len(),
        downgraded = report.downgraded,
        errors = report.errors.len(),
        elapsed_ms = report.elapsed_ms,
        "analysis run finished"
    );
    report
}

/// Ad-hoc synthesis over signals mentioning `topic`. Nothing is persisted.
pub async fn research_topic<S>(
    signals: &S,
    engine: &dyn SynthesisEngine,
    trust: &TrustTable,
    opts: &ResearchOptions,
) -> RunReport
where
    S: SignalStore + ?Sized,
{
    ensure_metrics_described();
    counter!("analysis_runs_total").increment(1);

    let t0 = Instant::now();
    let run_at = opts.now.unwrap_or_else(Utc::now);
    let mut report = RunReport::new(run_at);
    let start = window_start(run_at, opts.lookback);
    // Half-open ranges; include signals stamped exactly at `run_at`.
    let end = run_at + Duration::seconds(1);

    let pool = match signals.query_in_range(None, start, end).await {
        Ok(v) => v,
        Err(e) => {
            report.errors.push(format!("signal query: {e}"));
            return report.finish(t0);
        }
    };
    let batch: Vec<Signal> = pool
        .into_iter()
        .filter(|s| mentions(s, &opts.topic))
        .collect();
    report.signals = batch.len();
    if batch.is_empty() {
        tracing::info!(topic = %opts.topic, "no signals mention the topic");
        return report.finish(t0);
    }

    // Velocity inside the look-back: later half against earlier half.
    let mid = start + (run_at - start) / 2;
    let (current, previous): (Vec<Signal>, Vec<Signal>) =
        batch.iter().cloned().partition(|s| s.observed_at >= mid);
    let scores = score_windows(&current, &previous);
    report.hot_topics = hot_topic_names(&scores);

    let compiled = PromptCompiler::new(trust).compile_research(
        &batch,
        &scores,
        opts.knowledge.as_deref(),
        &opts.topic,
    );
    report.template = Some(compiled.template);

    if let Some(parsed) =
        synthesize_and_parse(engine, &compiled, &Validator::default(), &mut report).await
    {
        let enriched = enrich_all(parsed.insights, trust);
        report.downgraded = enriched.iter().filter(|e| e.audit().suspect).count();
        report.insights = enriched;
    }
    report.finish(t0)
}

async fn synthesize_and_parse(
    engine: &dyn SynthesisEngine,
    compiled: &CompiledPrompt,
    validator: &Validator,
    report: &mut RunReport,
) -> Option<ParseOutcome> {
    let t_s = Instant::now();
    let raw = engine.synthesize(&compiled.text).await;
    histogram!("synthesis_ms").record(t_s.elapsed().as_secs_f64() * 1_000.0);

    let raw = match raw {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(engine = engine.name(), error = %e, "synthesis failed");
            counter!("synthesis_failures_total").increment(1);
            report.errors.push(format!("synthesis: {e}"));
            return None;
        }
    };

    match validator.parse(&raw) {
        Ok(parsed) => {
            report.notes = parsed
                .notes
                .iter()
                .map(|n| format!("#{}: {}", n.index, n.message))
                .collect();
            Some(parsed)
        }
        Err(e) => {
            tracing::warn!(engine = engine.name(), error = %e, "synthesis output rejected");
            counter!("synthesis_failures_total").increment(1);
            report.errors.push(format!("format: {e}"));
            None
        }
    }
}

fn hot_topic_names(scores: &[VelocityScore]) -> Vec<String> {
    scores
        .iter()
        .filter(|s| s.is_hot)
        .map(|s| s.topic.clone())
        .collect()
}

/// Tag match, or a case-insensitive substring of title/body.
fn mentions(s: &Signal, topic: &str) -> bool {
    let needle = topic.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    s.tags.iter().any(|t| *t == needle)
        || s.title.to_lowercase().contains(&needle)
        || s.body.to_lowercase().contains(&needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::synthesis::MockEngine;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn empty_store_is_a_valid_empty_run() {
        let store = MemoryStore::new();
        let engine = MockEngine::default();
        let opts = AnalysisOptions {
            now: Some(now()),
            ..AnalysisOptions::default()
        };
        let r = run_analysis(&store, &store, &engine, &TrustTable::empty(), &opts).await;
        assert_eq!(r.signals, 0);
        assert!(r.insights.is_empty());
        assert!(r.errors.is_empty());
        assert!(!r.persisted);
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn oversized_window_and_lookback_do_not_overflow() {
        let store = MemoryStore::new();
        store
            .upsert_signals(vec![Signal::new("hn", "1", "agents everywhere", now())
                .with_tags(["agents"])])
            .await;
        let engine = MockEngine::default();

        let opts = AnalysisOptions {
            window: Duration::hours(i64::from(u32::MAX)),
            now: Some(now()),
            ..AnalysisOptions::default()
        };
        let r = run_analysis(&store, &store, &engine, &TrustTable::empty(), &opts).await;
        assert_eq!(r.signals, 1);
        assert!(r.persisted, "errors: {:?}", r.errors);

        let research = ResearchOptions {
            topic: "agents".into(),
            lookback: Duration::days(i64::from(u32::MAX)),
            knowledge: None,
            now: Some(now()),
        };
        let r = research_topic(&store, &engine, &TrustTable::empty(), &research).await;
        assert_eq!(r.signals, 1);
        assert!(r.errors.is_empty(), "errors: {:?}", r.errors);
    }

    #[test]
    fn mentions_matches_tags_and_text() {
        let s = Signal::new("hn", "1", "Why MCP servers leak", now()).with_tags(["agents"]);
        assert!(mentions(&s, "mcp"));
        assert!(mentions(&s, "Agents"));
        assert!(!mentions(&s, "wasm"));
        assert!(!mentions(&s, "  "));
    }
}
