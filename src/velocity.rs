//! # Velocity Engine
//! Compares two adjacent, equal-length windows per topic tag.
//!
//! `current = [ref - w, ref)`, `previous = [ref - 2w, ref - w)`. Each signal
//! counts once per distinct tag, across all sources. Weights play no part.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::ingest::types::Signal;
use crate::store::{SignalStore, StoreError};

/// Topics growing faster than this are hot.
pub const HOT_THRESHOLD_PCT: f64 = 50.0;

/// Minimum previous-window count for a topic that vanished to be reported.
pub const FADING_MIN_PREVIOUS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityScore {
    pub topic: String,
    pub current_count: usize,
    pub previous_count: usize,
    pub velocity_pct: f64,
    pub is_hot: bool,
}

/// Query both windows and score them. Either query failing fails the call;
/// the pipeline treats that as "no hot-topics section", not as a dead run.
pub async fn compute_velocity<S>(
    store: &S,
    window: Duration,
    reference_time: DateTime<Utc>,
) -> Result<Vec<VelocityScore>, StoreError>
where
    S: SignalStore + ?Sized,
{
    let mid = window_start(reference_time, window);
    let start = window_start(mid, window);

    let (current, previous) = tokio::join!(
        store.query_in_range(None, mid, reference_time),
        store.query_in_range(None, start, mid),
    );
    let (current, previous) = (current?, previous?);

    tracing::debug!(
        current = current.len(),
        previous = previous.len(),
        window_secs = window.num_seconds(),
        "velocity windows loaded"
    );
    Ok(score_windows(&current, &previous))
}

/// `end - window`, clamped to the earliest representable instant.
pub fn window_start(end: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    end.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Pure scoring over already-partitioned windows.
pub fn score_windows(current: &[Signal], previous: &[Signal]) -> Vec<VelocityScore> {
    let cur = count_tags(current);
    let prev = count_tags(previous);

    let topics: BTreeSet<&String> = cur.keys().chain(prev.keys()).collect();
    let mut out: Vec<VelocityScore> = topics
        .into_iter()
        .map(|t| {
            let c = cur.get(t).copied().unwrap_or(0);
            let p = prev.get(t).copied().unwrap_or(0);
            let v = velocity_pct(c, p);
            VelocityScore {
                topic: t.clone(),
                current_count: c,
                previous_count: p,
                velocity_pct: v,
                is_hot: v > HOT_THRESHOLD_PCT,
            }
        })
        .collect();

    // Topics arrive sorted by name, so the stable sort keeps ties alphabetical.
    out.sort_by(|a, b| b.velocity_pct.total_cmp(&a.velocity_pct));
    out
}

/// New topics count as +100%, not infinity. Rounded to one decimal.
pub fn velocity_pct(current: usize, previous: usize) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    let raw = (current as f64 - previous as f64) / previous as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

/// Topics that disappeared from the current window after a real presence.
pub fn fading_topics(scores: &[VelocityScore]) -> Vec<&VelocityScore> {
    scores
        .iter()
        .filter(|s| s.current_count == 0 && s.previous_count >= FADING_MIN_PREVIOUS)
        .collect()
}

fn count_tags(signals: &[Signal]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for s in signals {
        let distinct: BTreeSet<String> = s.tags.iter().map(|t| t.to_lowercase()).collect();
        for t in distinct {
            *counts.entry(t).or_insert(0) += 1;
        }
    }
    counts
}
