//! memory.rs: in-process store used by tests and ad-hoc runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::{
    in_range, page, InsightStore, SignalStore, StoreResult, UpsertReport, DEFAULT_PAGE_SIZE,
};
use crate::ingest::types::Signal;
use crate::insight::{EnrichedInsight, InsightKind, StoredRun};

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
    kinds: Vec<InsightKind>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order is kept so stored content is append-only.
    signals: Vec<Signal>,
    keys: HashSet<(String, String)>,
    runs: Vec<StoredRun>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: DEFAULT_PAGE_SIZE,
            kinds: InsightKind::ALL.to_vec(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Restrict the insight kinds this store accepts (legacy schema emulation).
    pub fn with_supported_kinds(mut self, kinds: &[InsightKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn signal_count(&self) -> usize {
        self.lock().signals.len()
    }

    pub fn run_count(&self) -> usize {
        self.lock().runs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock still holds consistent data: every mutation below is a single push.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn upsert_signals(&self, batch: Vec<Signal>) -> UpsertReport {
        let mut report = UpsertReport::default();
        let mut g = self.lock();
        for s in batch {
            let key = (s.source.clone(), s.natural_id.clone());
            if g.keys.insert(key) {
                g.signals.push(s);
                report.inserted_count += 1;
            } else {
                report.skipped_count += 1;
            }
        }
        report
    }

    async fn query_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Signal>> {
        let g = self.lock();
        let hits = g
            .signals
            .iter()
            .filter(|s| s.observed_at >= since)
            .cloned()
            .collect();
        Ok(page(hits, self.page_size))
    }

    async fn query_in_range(
        &self,
        source: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Signal>> {
        let g = self.lock();
        Ok(g
            .signals
            .iter()
            .filter(|s| in_range(s, source, start, end))
            .cloned()
            .collect())
    }

    async fn last_run_timestamp(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.lock().runs.iter().map(|r| r.run_at).max())
    }

    async fn count_by_source(&self) -> StoreResult<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        for s in &self.lock().signals {
            *out.entry(s.source.clone()).or_insert(0) += 1;
        }
        Ok(out)
    }
}

#[async_trait]
impl InsightStore for MemoryStore {
    async fn save_run(&self, run_at: DateTime<Utc>, insights: &[EnrichedInsight]) -> StoreResult<()> {
        self.lock().runs.push(StoredRun {
            run_at,
            insights: insights.to_vec(),
        });
        Ok(())
    }

    async fn latest_run(&self) -> StoreResult<Option<StoredRun>> {
        Ok(self.lock().runs.iter().max_by_key(|r| r.run_at).cloned())
    }

    fn supported_kinds(&self) -> &[InsightKind] {
        &self.kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[tokio::test]
    async fn second_upsert_of_same_key_is_a_noop() {
        let store = MemoryStore::new();
        let first = Signal::new("hn", "42", "original title", at(1));
        let again = Signal::new("hn", "42", "edited title", at(2));

        let r1 = store.upsert_signals(vec![first.clone()]).await;
        let r2 = store.upsert_signals(vec![again]).await;

        assert_eq!(r1.inserted_count, 1);
        assert_eq!(r2.inserted_count, 0);
        assert_eq!(r2.skipped_count, 1);
        let all = store.query_since(at(0)).await.unwrap();
        assert_eq!(all, vec![first]);
    }

    #[tokio::test]
    async fn same_natural_id_under_different_sources_are_distinct() {
        let store = MemoryStore::new();
        let r = store
            .upsert_signals(vec![
                Signal::new("hn", "1", "a", at(1)),
                Signal::new("reddit", "1", "b", at(1)),
            ])
            .await;
        assert_eq!(r.inserted_count, 2);
    }

    #[tokio::test]
    async fn range_query_is_half_open_and_filters_source() {
        let store = MemoryStore::new();
        store
            .upsert_signals(vec![
                Signal::new("hn", "a", "a", at(0)),
                Signal::new("hn", "b", "b", at(1)),
                Signal::new("reddit", "c", "c", at(1)),
                Signal::new("hn", "d", "d", at(2)),
            ])
            .await;
        let hits = store.query_in_range(None, at(0), at(2)).await.unwrap();
        assert_eq!(hits.len(), 3);
        let hn = store.query_in_range(Some("HN"), at(0), at(2)).await.unwrap();
        assert_eq!(hn.len(), 2);
    }

    #[tokio::test]
    async fn query_since_is_paged_newest_first() {
        let store = MemoryStore::new().with_page_size(2);
        store
            .upsert_signals((0..5).map(|i| Signal::new("hn", i.to_string(), "t", at(i))).collect())
            .await;
        let hits = store.query_since(at(0)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].natural_id, "4");
        assert_eq!(hits[1].natural_id, "3");
    }
}
