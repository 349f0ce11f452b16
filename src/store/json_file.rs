//! json_file.rs: directory-backed store.
//!
//! Layout under the data dir:
//! - `signals/<stem>.json`: array of signals for one source, insertion order
//! - `runs/<run_at>.json`: one `StoredRun` per analysis run
//!
//! Every write goes to `*.tmp` first and is renamed into place, so readers
//! never see half a file and a run is either fully persisted or absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{
    in_range, page, InsightStore, SignalStore, StoreError, StoreResult, UpsertReport,
    DEFAULT_PAGE_SIZE,
};
use crate::ingest::types::Signal;
use crate::insight::{EnrichedInsight, InsightKind, StoredRun};

const RUN_FILE_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

pub struct JsonFileStore {
    root: PathBuf,
    page_size: usize,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn signals_dir(&self) -> PathBuf {
        self.root.join("signals")
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn source_path(&self, source: &str) -> PathBuf {
        let source = crate::ingest::types::normalize_source(source);
        self.signals_dir().join(format!("{}.json", file_stem(&source)))
    }

    async fn read_source(&self, path: &Path) -> StoreResult<Vec<Signal>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| serde_err(path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    async fn read_all_signals(&self) -> StoreResult<Vec<Signal>> {
        let mut out = Vec::new();
        for path in list_json(&self.signals_dir()).await? {
            out.extend(self.read_source(&path).await?);
        }
        Ok(out)
    }

    async fn upsert_source(&self, source: &str, batch: Vec<Signal>) -> StoreResult<(usize, usize)> {
        let path = self.source_path(source);
        let mut stored = self.read_source(&path).await?;
        let mut keys: HashSet<(String, String)> = stored
            .iter()
            .map(|s| (s.source.clone(), s.natural_id.clone()))
            .collect();

        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for s in batch {
            if keys.insert((s.source.clone(), s.natural_id.clone())) {
                stored.push(s);
                inserted += 1;
            } else {
                skipped += 1;
            }
        }
        if inserted > 0 {
            write_json_atomic(&path, &stored).await?;
        }
        Ok((inserted, skipped))
    }
}

#[async_trait]
impl SignalStore for JsonFileStore {
    async fn upsert_signals(&self, batch: Vec<Signal>) -> UpsertReport {
        let _guard = self.write_lock.lock().await;

        // Each source has its own file, so one bad source cannot block the others.
        let mut by_source: BTreeMap<String, Vec<Signal>> = BTreeMap::new();
        for s in batch {
            by_source.entry(s.source.clone()).or_default().push(s);
        }

        let mut report = UpsertReport::default();
        for (source, signals) in by_source {
            let n = signals.len();
            match self.upsert_source(&source, signals).await {
                Ok((inserted, skipped)) => {
                    report.inserted_count += inserted;
                    report.skipped_count += skipped;
                }
                Err(e) => {
                    tracing::warn!(source = %source, dropped = n, error = %e, "signal upsert failed");
                    report.errors.push(format!("{source}: {e}"));
                }
            }
        }
        report
    }

    async fn query_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Signal>> {
        let hits = self
            .read_all_signals()
            .await?
            .into_iter()
            .filter(|s| s.observed_at >= since)
            .collect();
        Ok(page(hits, self.page_size))
    }

    async fn query_in_range(
        &self,
        source: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Signal>> {
        let pool = match source {
            Some(src) => self.read_source(&self.source_path(src)).await?,
            None => self.read_all_signals().await?,
        };
        Ok(pool
            .into_iter()
            .filter(|s| in_range(s, source, start, end))
            .collect())
    }

    async fn last_run_timestamp(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.latest_run().await?.map(|r| r.run_at))
    }

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        for s in self.read_all_signals().await? {
            *out.entry(s.source).or_insert(0) += 1;
        }
        Ok(out)
    }
}

#[async_trait]
impl InsightStore for JsonFileStore {
    async fn save_run(&self, run_at: DateTime<Utc>, insights: &[EnrichedInsight]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let run = StoredRun {
            run_at,
            insights: insights.to_vec(),
        };
        let path = self
            .runs_dir()
            .join(format!("{}.json", run_at.format(RUN_FILE_FORMAT)));
        write_json_atomic(&path, &run).await
    }

    async fn latest_run(&self) -> StoreResult<Option<StoredRun>> {
        // File names sort chronologically.
        let Some(path) = list_json(&self.runs_dir()).await?.pop() else {
            return Ok(None);
        };
        let bytes = fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        let run: StoredRun = serde_json::from_slice(&bytes).map_err(|e| serde_err(&path, e))?;
        Ok(Some(run))
    }

    fn supported_kinds(&self) -> &[InsightKind] {
        &InsightKind::ALL
    }
}

/// Sorted `*.json` files in `dir`; a missing dir is empty.
async fn list_json(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| io_err(dir, e))? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

async fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| serde_err(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await.map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).await.map_err(|e| io_err(path, e))
}

/// Source ids become file names; anything outside `[a-z0-9_-]` is replaced.
/// A rewritten id gets a short hash of the original appended, so `a.b` and
/// `a_b` land in different files.
fn file_stem(source: &str) -> String {
    let sanitized: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if !sanitized.is_empty() && sanitized == source {
        return sanitized;
    }
    let digest = Sha256::digest(source.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{sanitized}-{suffix}")
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn serde_err(path: &Path, source: serde_json::Error) -> StoreError {
    StoreError::Serde {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::{Insight, InsightKind};
    use chrono::{Duration, TimeZone};

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn file_stem_is_filesystem_safe() {
        assert_eq!(file_stem("arxiv_cs_ai"), "arxiv_cs_ai");

        let escaped = file_stem("../etc/passwd");
        assert!(escaped.starts_with("___etc_passwd-"), "{escaped}");
        assert!(escaped
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(escaped, file_stem("../etc/passwd"));
    }

    #[test]
    fn rewritten_ids_do_not_share_a_stem() {
        assert_ne!(file_stem("a.b"), file_stem("a_b"));
        assert_ne!(file_stem("HN"), file_stem("hn"));
        assert_ne!(file_stem(""), file_stem("_"));
    }

    #[tokio::test]
    async fn look_alike_sources_keep_their_own_signals() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path());

        let r = store
            .upsert_signals(vec![
                Signal::new("a.b", "1", "dotted", at(1)),
                Signal::new("a_b", "1", "underscored", at(1)),
            ])
            .await;
        assert_eq!(r.inserted_count, 2);
        assert_eq!(r.skipped_count, 0);

        let again = store
            .upsert_signals(vec![Signal::new("a_b", "1", "underscored", at(1))])
            .await;
        assert_eq!(again.inserted_count, 0);
        assert_eq!(again.skipped_count, 1);

        let counts = store.count_by_source().await.unwrap();
        assert_eq!(counts.get("a.b"), Some(&1));
        assert_eq!(counts.get("a_b"), Some(&1));

        let dotted = store.query_in_range(Some("a.b"), at(0), at(2)).await.unwrap();
        assert_eq!(dotted.len(), 1);
        assert_eq!(dotted[0].title, "dotted");
    }

    #[tokio::test]
    async fn upsert_persists_and_ignores_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let s = Signal::new("hn", "1", "first", at(1)).with_tags(["rust"]);

        let r1 = store.upsert_signals(vec![s.clone()]).await;
        let r2 = store
            .upsert_signals(vec![Signal::new("hn", "1", "rewritten", at(2))])
            .await;
        assert_eq!(r1.inserted_count, 1);
        assert_eq!(r2.inserted_count, 0);
        assert!(r2.errors.is_empty());

        // A fresh handle over the same directory sees the original content.
        let reopened = JsonFileStore::new(tmp.path());
        let all = reopened.query_since(at(0)).await.unwrap();
        assert_eq!(all, vec![s]);
        assert_eq!(reopened.count_by_source().await.unwrap().get("hn"), Some(&1));
    }

    #[tokio::test]
    async fn runs_round_trip_and_latest_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path());
        assert!(store.latest_run().await.unwrap().is_none());
        assert!(store.last_run_timestamp().await.unwrap().is_none());

        let table = crate::trust::TrustTable::empty();
        let one = crate::analyze::convergence::enrich(
            Insight::new(InsightKind::Trend, "agents", "x").with_sources(["hn"]),
            &table,
        );
        store.save_run(at(1), &[]).await.unwrap();
        store.save_run(at(5), std::slice::from_ref(&one)).await.unwrap();

        let latest = store.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.run_at, at(5));
        assert_eq!(latest.insights, vec![one]);
        assert_eq!(store.last_run_timestamp().await.unwrap(), Some(at(5)));
    }
}
