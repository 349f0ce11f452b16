//! # Trust Classifier
//!
//! Maps a source id (e.g. "hackernews", "arxiv_cs_ai") to a coarse trust tier
//! and a human-readable descriptor.
//!
//! - Two layers: a fixed legacy table (all `raw`) and the curated feed list.
//! - Case- and whitespace-insensitive lookup.
//! - Unknown sources never fail: they resolve to `raw` with an identity
//!   display name.
//!
//! A `TrustTable` is built once at start-up and handed by reference to the
//! prompt compiler, the convergence aggregator and the publisher, so every
//! component resolves tiers from the same value.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ingest::config::FeedConfig;
use crate::ingest::types::normalize_source;

/// Coarse reliability/editorial-bias class. Declaration order is display
/// order only; convergence counts distinct tiers and never weighs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Primary,
    Expert,
    Editorial,
    Crowd,
    Algorithmic,
    ModelKnowledge,
    Raw,
}

impl TrustTier {
    pub const ALL: [TrustTier; 7] = [
        TrustTier::Primary,
        TrustTier::Expert,
        TrustTier::Editorial,
        TrustTier::Crowd,
        TrustTier::Algorithmic,
        TrustTier::ModelKnowledge,
        TrustTier::Raw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrustTier::Primary => "primary",
            TrustTier::Expert => "expert",
            TrustTier::Editorial => "editorial",
            TrustTier::Crowd => "crowd",
            TrustTier::Algorithmic => "algorithmic",
            TrustTier::ModelKnowledge => "model_knowledge",
            TrustTier::Raw => "raw",
        }
    }

    /// Lenient parse for tier names coming back from the synthesis step.
    pub fn parse(s: &str) -> Option<Self> {
        let k = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        TrustTier::ALL.into_iter().find(|t| t.as_str() == k)
    }

    pub fn is_raw(self) -> bool {
        self == TrustTier::Raw
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display data for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub display_name: String,
    pub angle: String,
}

#[derive(Debug, Clone)]
struct Entry {
    tier: TrustTier,
    descriptor: SourceDescriptor,
}

/// Legacy scraped sources. All sit in the lowest tier.
const LEGACY_RAW_SOURCES: [(&str, &str); 4] = [
    ("moltbook", "Moltbook"),
    ("hackernews", "Hacker News"),
    ("reddit", "Reddit"),
    ("github_trending", "GitHub Trending"),
];

/// Static source → tier mapping.
#[derive(Debug, Clone, Default)]
pub struct TrustTable {
    entries: BTreeMap<String, Entry>,
}

impl TrustTable {
    /// Empty table: every source resolves to `raw`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Legacy layer plus curated feeds. Curated entries override legacy ids.
    pub fn from_feeds(feeds: &[FeedConfig]) -> Self {
        let mut table = Self::empty();
        for (id, name) in LEGACY_RAW_SOURCES {
            table.insert(id, TrustTier::Raw, name, "Unfiltered community chatter");
        }
        for f in feeds {
            table.insert(&f.id, f.tier, &f.display_name, &f.angle);
        }
        table
    }

    /// Add or replace a single source. Used by callers assembling fixtures.
    pub fn insert(&mut self, source: &str, tier: TrustTier, display_name: &str, angle: &str) {
        let id = normalize_source(source);
        if id.is_empty() {
            return;
        }
        self.entries.insert(
            id,
            Entry {
                tier,
                descriptor: SourceDescriptor {
                    display_name: display_name.to_string(),
                    angle: angle.to_string(),
                },
            },
        );
    }

    /// Builder-style `insert`.
    pub fn with_source(mut self, source: &str, tier: TrustTier) -> Self {
        self.insert(source, tier, source, "");
        self
    }

    pub fn tier_of(&self, source: &str) -> TrustTier {
        self.entries
            .get(&normalize_source(source))
            .map(|e| e.tier)
            .unwrap_or(TrustTier::Raw)
    }

    pub fn descriptor_of(&self, source: &str) -> SourceDescriptor {
        match self.entries.get(&normalize_source(source)) {
            Some(e) => e.descriptor.clone(),
            None => SourceDescriptor {
                display_name: source.trim().to_string(),
                angle: String::new(),
            },
        }
    }

    pub fn is_known(&self, source: &str) -> bool {
        self.entries.contains_key(&normalize_source(source))
    }

    /// Distinct tiers of the given sources.
    pub fn tiers_of<'a, I>(&self, sources: I) -> BTreeSet<TrustTier>
    where
        I: IntoIterator<Item = &'a str>,
    {
        sources.into_iter().map(|s| self.tier_of(s)).collect()
    }

    /// Known sources grouped by tier, in display order.
    pub fn by_tier(&self) -> BTreeMap<TrustTier, Vec<String>> {
        let mut out: BTreeMap<TrustTier, Vec<String>> = BTreeMap::new();
        for (id, e) in &self.entries {
            out.entry(e.tier).or_default().push(id.clone());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
