//! insight.rs: typed conclusions produced by the synthesis step.
//!
//! `Insight` is what the validator builds from raw model output.
//! `EnrichedInsight` is the same insight after the convergence aggregator has
//! attached its recomputed metadata; its fields are private so the attached
//! block cannot be changed or recomputed afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::trust::TrustTier;

/// Upper bound on `Insight::summary`, in characters.
pub const SUMMARY_MAX_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Trend,
    Consensus,
    Divergence,
    #[serde(alias = "tool-mention")]
    ToolMention,
    /// Absence finding: something expected did not show up.
    Gap,
}

impl InsightKind {
    pub const ALL: [InsightKind; 5] = [
        InsightKind::Trend,
        InsightKind::Consensus,
        InsightKind::Divergence,
        InsightKind::ToolMention,
        InsightKind::Gap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::Trend => "trend",
            InsightKind::Consensus => "consensus",
            InsightKind::Divergence => "divergence",
            InsightKind::ToolMention => "tool_mention",
            InsightKind::Gap => "gap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let k = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        InsightKind::ALL.into_iter().find(|x| x.as_str() == k)
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// p0 is the highest priority. Ordering follows declaration: `P0 < P1 < P2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::P0 => "p0",
            Priority::P1 => "p1",
            Priority::P2 => "p2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p0" | "0" => Some(Priority::P0),
            "p1" | "1" => Some(Priority::P1),
            "p2" | "2" => Some(Priority::P2),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reward pattern the synthesis step may flag on an insight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[default]
    None,
    Absence,
    Reversal,
    CrossDomain,
}

impl Pattern {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "" | "none" => Some(Pattern::None),
            "absence" => Some(Pattern::Absence),
            "reversal" => Some(Pattern::Reversal),
            "cross_domain" | "cross_domain_surprise" => Some(Pattern::CrossDomain),
            _ => None,
        }
    }
}

/// A validated conclusion, before convergence is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub topic: String,
    pub summary: String,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    /// As claimed by the synthesis step. Advisory until enrichment.
    pub priority: Priority,
    /// Lower-cased source ids, deduplicated, in claimed order.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub pattern: Pattern,
    /// Self-reported tiers from the synthesis step. Audit input only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claimed_tiers: Vec<String>,
}

impl Insight {
    pub fn new(kind: InsightKind, topic: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            summary: summary.into(),
            confidence: 0.0,
            priority: Priority::P2,
            sources: Vec::new(),
            pattern: Pattern::None,
            claimed_tiers: Vec::new(),
        }
    }

    pub fn with_priority(mut self, p: Priority) -> Self {
        self.priority = p;
        self
    }

    pub fn with_confidence(mut self, c: f32) -> Self {
        self.confidence = clamp01(c);
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sources = crate::ingest::types::normalize_tags(sources);
        self
    }

    pub fn with_pattern(mut self, p: Pattern) -> Self {
        self.pattern = p;
        self
    }
}

/// Cross-tier diversity recomputed from `Insight::sources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Convergence {
    pub source_count: usize,
    pub tier_count: usize,
    /// Tier → number of contributing sources.
    pub tiers: BTreeMap<TrustTier, usize>,
}

/// Side-by-side record of what the synthesis step claimed and what the
/// recomputation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceAudit {
    pub claimed_priority: Priority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claimed_tiers: Vec<String>,
    /// 3+ sources across 3+ distinct tiers.
    pub floor_met: bool,
    /// Claimed p0 without meeting the floor.
    pub suspect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// An insight with convergence metadata attached exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedInsight {
    #[serde(flatten)]
    insight: Insight,
    convergence: Convergence,
    audit: ConvergenceAudit,
}

impl EnrichedInsight {
    /// Only the convergence aggregator builds these.
    pub(crate) fn new(insight: Insight, convergence: Convergence, audit: ConvergenceAudit) -> Self {
        Self {
            insight,
            convergence,
            audit,
        }
    }

    pub fn insight(&self) -> &Insight {
        &self.insight
    }

    pub fn convergence(&self) -> &Convergence {
        &self.convergence
    }

    pub fn audit(&self) -> &ConvergenceAudit {
        &self.audit
    }

    pub fn kind(&self) -> InsightKind {
        self.insight.kind
    }

    pub fn topic(&self) -> &str {
        &self.insight.topic
    }

    pub fn summary(&self) -> &str {
        &self.insight.summary
    }

    pub fn confidence(&self) -> f32 {
        self.insight.confidence
    }

    /// Final priority, after reconciliation against the convergence floor.
    pub fn priority(&self) -> Priority {
        self.insight.priority
    }

    pub fn sources(&self) -> &[String] {
        &self.insight.sources
    }

    /// True when the final priority respects the p0 floor.
    pub fn is_consistent(&self) -> bool {
        self.priority() != Priority::P0 || self.audit.floor_met
    }
}

/// One analysis run's insights, sharing one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_at: DateTime<Utc>,
    pub insights: Vec<EnrichedInsight>,
}

pub(crate) fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
