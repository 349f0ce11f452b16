// tests/velocity_dedup.rs
//
// Re-ingesting the same signal must not inflate topic velocity, for both
// store adapters.

use chrono::{DateTime, Duration, TimeZone, Utc};

use signal_radar::ingest::types::Signal;
use signal_radar::store::{JsonFileStore, MemoryStore, SignalStore};
use signal_radar::velocity::compute_velocity;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn post() -> Signal {
    Signal::new("lobsters", "abc", "Sandbox defaults", now() - Duration::hours(2))
        .with_tags(["agents", "sandbox"])
}

async fn ingest_twice_and_score<S: SignalStore>(store: &S) {
    let first = store.upsert_signals(vec![post()]).await;
    assert_eq!(first.inserted_count, 1);

    let again = store.upsert_signals(vec![post(), post()]).await;
    assert_eq!(again.inserted_count, 0);
    assert_eq!(again.skipped_count, 2);

    let scores = compute_velocity(store, Duration::hours(24), now())
        .await
        .unwrap();
    assert_eq!(scores.len(), 2);
    for s in &scores {
        assert_eq!(s.current_count, 1, "{}", s.topic);
        assert_eq!(s.previous_count, 0);
        assert_eq!(s.velocity_pct, 100.0);
    }
}

#[tokio::test]
async fn memory_store_counts_a_reingested_signal_once() {
    ingest_twice_and_score(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_store_counts_a_reingested_signal_once() {
    let dir = tempfile::tempdir().unwrap();
    ingest_twice_and_score(&JsonFileStore::new(dir.path())).await;

    // Same answer after reopening the directory.
    let reopened = JsonFileStore::new(dir.path());
    let scores = compute_velocity(&reopened, Duration::hours(24), now())
        .await
        .unwrap();
    assert!(scores.iter().all(|s| s.current_count == 1));
}
