// tests/analysis_pipeline.rs
//
// End-to-end analysis runs over an in-memory store with the mock engine.
//
// Covered:
// - converged p0 kept, single-source p0 demoted and audited
// - the run is persisted once, under one timestamp
// - a destination without `gap` gets the remapped kind plus a note
// - failed synthesis / malformed output persists nothing
// - the next run only sees signals newer than the last run
// - a signal stamped exactly at the previous run lands in that run only
// - research runs are never persisted

use chrono::{DateTime, Duration, TimeZone, Utc};

use signal_radar::analyze::synthesis::{DisabledEngine, MockEngine};
use signal_radar::analyze::{research_topic, run_analysis, AnalysisOptions, ResearchOptions};
use signal_radar::ingest::types::Signal;
use signal_radar::store::{InsightStore, MemoryStore, SignalStore};
use signal_radar::{InsightKind, Priority, TrustTable, TrustTier};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn trust() -> TrustTable {
    TrustTable::empty()
        .with_source("anthropic_news", TrustTier::Primary)
        .with_source("openai_blog", TrustTier::Primary)
        .with_source("simonwillison", TrustTier::Expert)
        .with_source("the_verge_ai", TrustTier::Editorial)
        .with_source("lobsters", TrustTier::Crowd)
        .with_source("hackernews", TrustTier::Raw)
}

fn signal(source: &str, id: usize, hours_ago: i64, tag: &str) -> Signal {
    Signal::new(
        source,
        format!("{source}-{id}"),
        format!("{tag} item {id} on sandbox defaults"),
        now() - Duration::hours(hours_ago),
    )
    .with_tags([tag])
    .with_weight(10)
}

async fn seeded(store: &MemoryStore) {
    let mut batch = vec![
        signal("anthropic_news", 1, 2, "agents"),
        signal("simonwillison", 2, 3, "agents"),
        signal("lobsters", 3, 4, "agents"),
        signal("hackernews", 4, 5, "routing"),
        // previous window
        signal("lobsters", 5, 30, "agents"),
    ];
    batch.push(signal("the_verge_ai", 6, 6, "evals"));
    let r = store.upsert_signals(batch).await;
    assert!(r.errors.is_empty(), "seed errors: {:?}", r.errors);
}

fn opts() -> AnalysisOptions {
    AnalysisOptions {
        now: Some(now()),
        ..AnalysisOptions::default()
    }
}

#[tokio::test]
async fn mock_run_enriches_downgrades_and_persists() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let report = run_analysis(&store, &store, &MockEngine::default(), &trust(), &opts()).await;

    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert!(report.persisted);
    // Only the current window batch: the 30h-old signal predates `now - 24h`.
    assert_eq!(report.signals, 5);
    assert!(report.hot_topics.contains(&"agents".to_string()));
    assert_eq!(report.insights.len(), 3);
    assert_eq!(report.downgraded, 1);

    let converged = &report.insights[0];
    assert_eq!(converged.priority(), Priority::P0);
    assert!(converged.audit().floor_met);
    assert_eq!(converged.convergence().source_count, 3);
    assert_eq!(converged.convergence().tier_count, 3);

    let single = &report.insights[1];
    assert_eq!(single.priority(), Priority::P1);
    assert_eq!(single.audit().claimed_priority, Priority::P0);
    assert!(single.audit().suspect);
    assert!(single.audit().note.is_some());
    // Claimed tiers are kept for audit, never trusted.
    assert_eq!(single.audit().claimed_tiers, vec!["raw", "crowd", "expert"]);
    assert_eq!(single.convergence().tier_count, 1);

    assert!(report.insights.iter().all(|i| i.is_consistent()));

    assert_eq!(store.run_count(), 1);
    let stored = store.latest_run().await.unwrap().expect("stored run");
    assert_eq!(stored.run_at, now());
    assert_eq!(stored.insights, report.insights);
}

#[tokio::test]
async fn destination_without_gap_gets_remapped_kind() {
    let store = MemoryStore::new().with_supported_kinds(&[
        InsightKind::Trend,
        InsightKind::Consensus,
        InsightKind::Divergence,
        InsightKind::ToolMention,
    ]);
    seeded(&store).await;

    let report = run_analysis(&store, &store, &MockEngine::default(), &trust(), &opts()).await;

    assert!(report.persisted);
    assert_eq!(report.insights[2].kind(), InsightKind::Divergence);
    assert_eq!(report.notes.len(), 1);
    assert!(report.notes[0].starts_with("#2:"), "{:?}", report.notes);
    assert!(report.notes[0].contains("gap"));
}

#[tokio::test]
async fn disabled_engine_persists_nothing() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let engine = DisabledEngine::new("synthesis disabled in config");
    let report = run_analysis(&store, &store, &engine, &trust(), &opts()).await;

    assert!(!report.persisted);
    assert!(report.insights.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("synthesis:"));
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn malformed_output_persists_nothing() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let engine = MockEngine::new("Sorry, I could not find anything notable today.");
    let report = run_analysis(&store, &store, &engine, &trust(), &opts()).await;

    assert!(!report.persisted);
    assert!(report.errors[0].starts_with("format:"), "{:?}", report.errors);
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn empty_array_is_a_persisted_empty_run() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let report = run_analysis(&store, &store, &MockEngine::new("[]"), &trust(), &opts()).await;

    assert!(report.errors.is_empty());
    assert!(report.persisted);
    assert!(report.insights.is_empty());
    assert_eq!(store.run_count(), 1);
}

#[tokio::test]
async fn next_run_only_sees_newer_signals() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let first = run_analysis(&store, &store, &MockEngine::default(), &trust(), &opts()).await;
    assert!(first.persisted);

    let later = AnalysisOptions {
        now: Some(now() + Duration::hours(1)),
        ..AnalysisOptions::default()
    };
    let second = run_analysis(&store, &store, &MockEngine::default(), &trust(), &later).await;
    assert_eq!(second.signals, 0);
    assert!(!second.persisted);
    assert_eq!(store.run_count(), 1);

    // One fresh signal after the first run is picked up.
    store
        .upsert_signals(vec![Signal::new(
            "openai_blog",
            "fresh",
            "New eval suite",
            now() + Duration::minutes(30),
        )])
        .await;
    let third = run_analysis(&store, &store, &MockEngine::default(), &trust(), &later).await;
    assert_eq!(third.signals, 1);
    assert!(third.persisted);
    assert_eq!(store.run_count(), 2);
}

#[tokio::test]
async fn signal_at_previous_run_instant_belongs_to_that_run_only() {
    let store = MemoryStore::new();
    store
        .upsert_signals(vec![Signal::new(
            "openai_blog",
            "edge",
            "Stamped at run time",
            now(),
        )])
        .await;

    let first = run_analysis(&store, &store, &MockEngine::default(), &trust(), &opts()).await;
    assert_eq!(first.signals, 1);
    assert!(first.persisted);

    let later = AnalysisOptions {
        now: Some(now() + Duration::hours(1)),
        ..AnalysisOptions::default()
    };
    let second = run_analysis(&store, &store, &MockEngine::default(), &trust(), &later).await;
    assert_eq!(second.signals, 0);
    assert!(!second.persisted);
    assert_eq!(store.run_count(), 1);
}

#[tokio::test]
async fn research_is_not_persisted() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let opts = ResearchOptions {
        topic: "agents".into(),
        lookback: Duration::days(7),
        knowledge: Some("Sandboxing was discussed last quarter.".into()),
        now: Some(now()),
    };
    let report = research_topic(&store, &MockEngine::default(), &trust(), &opts).await;

    // Tag matches: three current-window posts plus the older lobsters one.
    assert_eq!(report.signals, 4);
    assert_eq!(report.insights.len(), 3);
    assert_eq!(report.downgraded, 1);
    assert!(!report.persisted);
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn research_without_matches_skips_synthesis() {
    let store = MemoryStore::new();
    seeded(&store).await;

    let opts = ResearchOptions {
        topic: "quantum".into(),
        lookback: Duration::days(7),
        knowledge: None,
        now: Some(now()),
    };
    let engine = DisabledEngine::new("must not be called");
    let report = research_topic(&store, &engine, &trust(), &opts).await;

    assert_eq!(report.signals, 0);
    assert!(report.errors.is_empty());
    assert!(report.insights.is_empty());
}
