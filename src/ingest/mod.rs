// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod types;

use crate::ingest::types::{Signal, SourceProvider};
use crate::metrics::ensure_metrics_described;
use crate::store::SignalStore;
use metrics::{counter, gauge};
use serde::Serialize;

/// Body text cap, in characters.
pub const MAX_TEXT_CHARS: usize = 1500;

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<Option<regex::Regex>> =
        once_cell::sync::OnceCell::new();
    if let Some(re_tags) = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z!][^>]*>").ok()) {
        out = re_tags.replace_all(&out, " ").to_string();
    }

    // 3) Normalize curly quotes and guillemets to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

/// What one ingest pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// One entry per failed provider or failed store write.
    pub errors: Vec<String>,
}

/// Drop signals that cannot be keyed or displayed.
fn keep_signal(s: &Signal) -> bool {
    !s.source.is_empty() && !s.natural_id.trim().is_empty() && !s.title.trim().is_empty()
}

/// Fetch every provider once and upsert the results. A failing provider is
/// logged and recorded; the others still run.
pub async fn run_once<S>(providers: &[Box<dyn SourceProvider>], store: &S) -> IngestReport
where
    S: SignalStore + ?Sized,
{
    ensure_metrics_described();

    let mut report = IngestReport::default();
    let mut batch = Vec::new();
    for p in providers {
        match p.fetch_latest().await {
            Ok(v) => {
                tracing::debug!(provider = p.name(), signals = v.len(), "provider fetched");
                batch.extend(v.into_iter().filter(keep_signal));
            }
            Err(e) => {
                tracing::warn!(error = ?e, provider = p.name(), "provider error");
                counter!("ingest_provider_errors_total").increment(1);
                report.errors.push(format!("{}: {e:#}", p.name()));
            }
        }
    }
    report.fetched = batch.len();

    let upsert = store.upsert_signals(batch).await;
    report.inserted = upsert.inserted_count;
    report.skipped = upsert.skipped_count;
    report.errors.extend(upsert.errors);

    // Telemetry
    counter!("signals_inserted_total").increment(report.inserted as u64);
    gauge!("ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

    tracing::info!(
        fetched = report.fetched,
        inserted = report.inserted,
        skipped = report.skipped,
        errors = report.errors.len(),
        "ingest pass finished"
    );
    report
}
