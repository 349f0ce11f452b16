// src/store/mod.rs
//! Signal and insight repositories.
//!
//! Two adapters share these traits: [`memory::MemoryStore`] for tests and
//! one-shot runs, [`json_file::JsonFileStore`] for the CLI.

pub mod json_file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::ingest::types::Signal;
use crate::insight::{EnrichedInsight, InsightKind, StoredRun};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Default page size for `query_since`.
pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store data at {path} is not valid json: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a batch upsert. Conflicts are not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub inserted_count: usize,
    /// Already-stored `(source, natural_id)` pairs, left untouched.
    pub skipped_count: usize,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert signals whose `(source, natural_id)` is new; existing keys are no-ops.
    async fn upsert_signals(&self, batch: Vec<Signal>) -> UpsertReport;

    /// Signals observed at or after `since`, newest first, at most one page.
    async fn query_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Signal>>;

    /// Signals with `start <= observed_at < end`, optionally for one source.
    async fn query_in_range(
        &self,
        source: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Signal>>;

    /// Timestamp of the last persisted analysis run.
    async fn last_run_timestamp(&self) -> StoreResult<Option<DateTime<Utc>>>;

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, usize>>;
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Persist every insight of one run under `run_at`, or nothing.
    async fn save_run(&self, run_at: DateTime<Utc>, insights: &[EnrichedInsight]) -> StoreResult<()>;

    async fn latest_run(&self) -> StoreResult<Option<StoredRun>>;

    /// Kinds this destination can hold. The validator remaps anything else.
    fn supported_kinds(&self) -> &[InsightKind];
}

/// Sort newest first and cut to one page.
pub(crate) fn page(mut signals: Vec<Signal>, page_size: usize) -> Vec<Signal> {
    signals.sort_by(|a, b| {
        b.observed_at
            .cmp(&a.observed_at)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.natural_id.cmp(&b.natural_id))
    });
    signals.truncate(page_size);
    signals
}

pub(crate) fn in_range(
    s: &Signal,
    source: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    let source_ok = match source {
        Some(src) => s.source == crate::ingest::types::normalize_source(src),
        None => true,
    };
    source_ok && s.observed_at >= start && s.observed_at < end
}
