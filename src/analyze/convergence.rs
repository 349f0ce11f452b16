//! Convergence aggregator.
//!
//! Recomputes cross-tier diversity from each insight's cited sources, never
//! from what the synthesis step says about itself, and reconciles the claimed
//! priority against the p0 floor.

use metrics::counter;
use std::collections::BTreeMap;

use crate::insight::{Convergence, ConvergenceAudit, EnrichedInsight, Insight, Priority};
use crate::trust::{TrustTable, TrustTier};

/// A p0 needs this many distinct sources...
pub const P0_MIN_SOURCES: usize = 3;
/// ...spread over this many distinct tiers.
pub const P0_MIN_TIERS: usize = 3;

/// Tier histogram of a source list. Duplicates (case-insensitive) count once.
pub fn convergence_of(sources: &[String], trust: &TrustTable) -> Convergence {
    let distinct = crate::ingest::types::normalize_tags(sources);
    let mut tiers: BTreeMap<TrustTier, usize> = BTreeMap::new();
    for s in &distinct {
        *tiers.entry(trust.tier_of(s)).or_insert(0) += 1;
    }
    Convergence {
        source_count: distinct.len(),
        tier_count: tiers.len(),
        tiers,
    }
}

pub fn meets_p0_floor(c: &Convergence) -> bool {
    c.source_count >= P0_MIN_SOURCES && c.tier_count >= P0_MIN_TIERS
}

/// Attach convergence metadata once. A claimed p0 below the floor is kept on
/// the audit record, flagged suspect, and demoted to p1.
pub fn enrich(mut insight: Insight, trust: &TrustTable) -> EnrichedInsight {
    let convergence = convergence_of(&insight.sources, trust);
    let floor_met = meets_p0_floor(&convergence);
    let claimed_priority = insight.priority;
    let suspect = claimed_priority == Priority::P0 && !floor_met;

    let note = if suspect {
        insight.priority = Priority::P1;
        counter!("priority_downgrades_total").increment(1);
        tracing::warn!(
            topic = %insight.topic,
            sources = convergence.source_count,
            tiers = convergence.tier_count,
            "p0 claim below convergence floor, downgraded to p1"
        );
        Some(format!(
            "claimed p0 with {} source(s) across {} tier(s); p0 needs {P0_MIN_SOURCES} sources across {P0_MIN_TIERS} tiers",
            convergence.source_count, convergence.tier_count
        ))
    } else {
        None
    };

    let audit = ConvergenceAudit {
        claimed_priority,
        claimed_tiers: std::mem::take(&mut insight.claimed_tiers),
        floor_met,
        suspect,
        note,
    };
    EnrichedInsight::new(insight, convergence, audit)
}

/// Enrich a whole batch, preserving order.
pub fn enrich_all(insights: Vec<Insight>, trust: &TrustTable) -> Vec<EnrichedInsight> {
    insights.into_iter().map(|i| enrich(i, trust)).collect()
}
