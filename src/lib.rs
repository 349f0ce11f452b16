// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod insight;
pub mod metrics;
pub mod trust;
pub mod velocity;

// Signal acquisition (feed config, providers, normalization)
pub mod ingest;

// Persistence behind the SignalStore / InsightStore seams
pub mod store;

// Prompt → synthesis → validation → convergence
pub mod analyze;

// Feed artifacts (index.json, feed.json, feed.xml, archive.md)
pub mod publish;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{research_topic, run_analysis, RunReport};
pub use crate::api::router;
pub use crate::insight::{EnrichedInsight, Insight, InsightKind, Priority};
pub use crate::trust::{TrustTable, TrustTier};
