// src/publish/mod.rs
//! Publisher: insights + timestamp → four byte payloads.
//!
//! Rendering is pure; the same input gives byte-identical output. Items are
//! grouped by priority (p0 first) and keep validator order inside a group,
//! in every artifact. Cited sources are shown by display name and tier from
//! the shared trust table.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::insight::{Convergence, EnrichedInsight, InsightKind, Pattern, Priority};
use crate::trust::{TrustTable, TrustTier};

pub const INDEX_FILE: &str = "index.json";
pub const FEED_JSON_FILE: &str = "feed.json";
pub const FEED_XML_FILE: &str = "feed.xml";
pub const ARCHIVE_FILE: &str = "archive.md";

const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";
const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub index_json: Vec<u8>,
    pub feed_json: Vec<u8>,
    pub feed_xml: Vec<u8>,
    pub archive_md: Vec<u8>,
}

impl Artifacts {
    pub fn files(&self) -> [(&'static str, &[u8]); 4] {
        [
            (INDEX_FILE, self.index_json.as_slice()),
            (FEED_JSON_FILE, self.feed_json.as_slice()),
            (FEED_XML_FILE, self.feed_xml.as_slice()),
            (ARCHIVE_FILE, self.archive_md.as_slice()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    pub title: String,
    /// Prefix for links between artifacts. Empty keeps them relative.
    pub base_url: String,
}

impl Default for Publisher {
    fn default() -> Self {
        Self {
            title: "Signal Radar".to_string(),
            base_url: String::new(),
        }
    }
}

/// `Publisher::default().publish(..)`.
pub fn publish(
    insights: &[EnrichedInsight],
    generated_at: DateTime<Utc>,
    trust: &TrustTable,
) -> Result<Artifacts> {
    Publisher::default().publish(insights, generated_at, trust)
}

/// A cited source as readers see it.
#[derive(Debug, Clone, Serialize)]
struct SourceRef<'a> {
    id: &'a str,
    name: String,
    tier: TrustTier,
}

/// One insight with its stable id, in publication order.
struct Entry<'a> {
    id: String,
    insight: &'a EnrichedInsight,
    sources: Vec<SourceRef<'a>>,
}

impl Entry<'_> {
    /// `Name (tier), Name (tier)`; empty without sources.
    fn attribution(&self) -> String {
        self.sources
            .iter()
            .map(|s| format!("{} ({})", s.name, s.tier))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Publisher {
    pub fn publish(
        &self,
        insights: &[EnrichedInsight],
        generated_at: DateTime<Utc>,
        trust: &TrustTable,
    ) -> Result<Artifacts> {
        let entries = ordered(insights, generated_at, trust);
        Ok(Artifacts {
            index_json: self.render_index(&entries, generated_at)?,
            feed_json: self.render_json_feed(&entries, generated_at)?,
            feed_xml: self.render_rss(&entries, generated_at)?,
            archive_md: self.render_archive(&entries, generated_at).into_bytes(),
        })
    }

    fn link(&self, file: &str) -> String {
        if self.base_url.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), file)
        }
    }

    fn render_index(&self, entries: &[Entry<'_>], at: DateTime<Utc>) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Counts {
            total: usize,
            by_priority: BTreeMap<&'static str, usize>,
            by_kind: BTreeMap<&'static str, usize>,
        }
        #[derive(Serialize)]
        struct Links {
            feed_json: String,
            feed_xml: String,
            archive: String,
        }
        #[derive(Serialize)]
        struct Index<'a> {
            title: &'a str,
            generated_at: String,
            counts: Counts,
            p0_topics: Vec<&'a str>,
            links: Links,
        }

        let mut by_priority: BTreeMap<&'static str, usize> =
            Priority::ALL.iter().map(|p| (p.as_str(), 0)).collect();
        let mut by_kind: BTreeMap<&'static str, usize> =
            InsightKind::ALL.iter().map(|k| (k.as_str(), 0)).collect();
        for e in entries {
            *by_priority.entry(e.insight.priority().as_str()).or_insert(0) += 1;
            *by_kind.entry(e.insight.kind().as_str()).or_insert(0) += 1;
        }

        let doc = Index {
            title: &self.title,
            generated_at: rfc3339(at),
            counts: Counts {
                total: entries.len(),
                by_priority,
                by_kind,
            },
            p0_topics: p0_topics(entries),
            links: Links {
                feed_json: self.link(FEED_JSON_FILE),
                feed_xml: self.link(FEED_XML_FILE),
                archive: self.link(ARCHIVE_FILE),
            },
        };
        serde_json::to_vec_pretty(&doc).context("rendering index.json")
    }

    fn render_json_feed(&self, entries: &[Entry<'_>], at: DateTime<Utc>) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Ext<'a> {
            priority: Priority,
            kind: InsightKind,
            confidence: f32,
            pattern: Pattern,
            sources: &'a [String],
            attribution: &'a [SourceRef<'a>],
            #[serde(skip_serializing_if = "Option::is_none")]
            convergence: Option<&'a Convergence>,
        }
        #[derive(Serialize)]
        struct Item<'a> {
            id: &'a str,
            title: String,
            content_text: &'a str,
            date_published: String,
            tags: [&'static str; 2],
            #[serde(rename = "_insight")]
            insight: Ext<'a>,
        }
        #[derive(Serialize)]
        struct Feed<'a> {
            version: &'static str,
            title: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            feed_url: Option<String>,
            items: Vec<Item<'a>>,
        }

        let date = rfc3339(at);
        let items = entries
            .iter()
            .map(|e| {
                let i = e.insight;
                Item {
                    id: &e.id,
                    title: item_title(i),
                    content_text: i.summary(),
                    date_published: date.clone(),
                    tags: [i.kind().as_str(), i.priority().as_str()],
                    insight: Ext {
                        priority: i.priority(),
                        kind: i.kind(),
                        confidence: i.confidence(),
                        pattern: i.insight().pattern,
                        sources: i.sources(),
                        attribution: &e.sources,
                        convergence: (!i.sources().is_empty()).then(|| i.convergence()),
                    },
                }
            })
            .collect();

        let feed = Feed {
            version: JSON_FEED_VERSION,
            title: &self.title,
            feed_url: (!self.base_url.is_empty()).then(|| self.link(FEED_JSON_FILE)),
            items,
        };
        serde_json::to_vec_pretty(&feed).context("rendering feed.json")
    }

    fn render_rss(&self, entries: &[Entry<'_>], at: DateTime<Utc>) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Guid<'a> {
            #[serde(rename = "@isPermaLink")]
            is_perma_link: &'static str,
            #[serde(rename = "$text")]
            value: &'a str,
        }
        #[derive(Serialize)]
        struct Item<'a> {
            title: String,
            guid: Guid<'a>,
            description: String,
            #[serde(rename = "pubDate")]
            pub_date: String,
            category: [&'static str; 2],
        }
        #[derive(Serialize)]
        struct Channel<'a> {
            title: &'a str,
            link: String,
            description: &'a str,
            #[serde(rename = "lastBuildDate")]
            last_build_date: String,
            item: Vec<Item<'a>>,
        }
        #[derive(Serialize)]
        #[serde(rename = "rss")]
        struct Rss<'a> {
            #[serde(rename = "@version")]
            version: &'static str,
            channel: Channel<'a>,
        }

        let date = at.to_rfc2822();
        let items = entries
            .iter()
            .map(|e| Item {
                title: item_title(e.insight),
                guid: Guid {
                    is_perma_link: "false",
                    value: &e.id,
                },
                description: rss_description(e),
                pub_date: date.clone(),
                category: [e.insight.kind().as_str(), e.insight.priority().as_str()],
            })
            .collect();

        let doc = Rss {
            version: "2.0",
            channel: Channel {
                title: &self.title,
                link: self.link(INDEX_FILE),
                description: "Prioritized insights from cross-source signals",
                last_build_date: date.clone(),
                item: items,
            },
        };
        let body = quick_xml::se::to_string(&doc).context("rendering feed.xml")?;
        let mut out = String::with_capacity(XML_DECLARATION.len() + body.len() + 1);
        out.push_str(XML_DECLARATION);
        out.push_str(&body);
        out.push('\n');
        Ok(out.into_bytes())
    }

    fn render_archive(&self, entries: &[Entry<'_>], at: DateTime<Utc>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} archive\n", self.title);
        let _ = writeln!(out, "- Generated: {}", rfc3339(at));

        let counts: Vec<String> = Priority::ALL
            .iter()
            .map(|p| {
                let n = entries.iter().filter(|e| e.insight.priority() == *p).count();
                format!("{}: {n}", p.label())
            })
            .collect();
        let _ = writeln!(out, "- Insights: {} ({})", entries.len(), counts.join(", "));

        let top = p0_topics(entries);
        if top.is_empty() {
            out.push_str("- P0 topics: none\n");
        } else {
            out.push_str("- P0 topics:\n");
            for t in top {
                let _ = writeln!(out, "  - {t}");
            }
        }

        if entries.is_empty() {
            out.push_str("\n_No insights in this run._\n");
            return out;
        }

        for p in Priority::ALL {
            let group: Vec<&Entry<'_>> =
                entries.iter().filter(|e| e.insight.priority() == p).collect();
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n## {}", p.label());
            for e in group {
                let i = e.insight;
                let _ = writeln!(out, "\n### {}\n", i.topic());
                let _ = write!(out, "*{} | confidence {:.2}", i.kind(), i.confidence());
                if !e.sources.is_empty() {
                    let _ = write!(
                        out,
                        " | sources: {} | tiers: {}",
                        e.attribution(),
                        i.convergence().tier_count
                    );
                }
                out.push_str("*\n");
                if !i.summary().is_empty() {
                    let _ = writeln!(out, "\n{}", i.summary());
                }
                if let Some(note) = &i.audit().note {
                    let _ = writeln!(out, "\n> {note}");
                }
            }
        }
        out
    }
}

/// Priority groups, validator order within each; ids from the input position.
fn ordered<'a>(
    insights: &'a [EnrichedInsight],
    at: DateTime<Utc>,
    trust: &TrustTable,
) -> Vec<Entry<'a>> {
    let stamp = rfc3339(at);
    let mut entries: Vec<(usize, Entry<'_>)> = insights
        .iter()
        .enumerate()
        .map(|(idx, i)| {
            (
                idx,
                Entry {
                    id: item_id(&stamp, idx, i.topic()),
                    insight: i,
                    sources: i
                        .sources()
                        .iter()
                        .map(|id| SourceRef {
                            id: id.as_str(),
                            name: trust.descriptor_of(id).display_name,
                            tier: trust.tier_of(id),
                        })
                        .collect(),
                },
            )
        })
        .collect();
    entries.sort_by_key(|(idx, e)| (e.insight.priority(), *idx));
    entries.into_iter().map(|(_, e)| e).collect()
}

fn item_id(stamp: &str, index: usize, topic: &str) -> String {
    let digest = Sha256::digest(format!("{stamp}|{index}|{topic}").as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn rss_description(e: &Entry<'_>) -> String {
    let summary = e.insight.summary();
    if e.sources.is_empty() {
        return summary.to_string();
    }
    let attribution = e.attribution();
    if summary.is_empty() {
        format!("Sources: {attribution}")
    } else {
        format!("{summary}\n\nSources: {attribution}")
    }
}

fn item_title(i: &EnrichedInsight) -> String {
    format!("[{}] {}", i.priority().label(), i.topic())
}

fn p0_topics<'a>(entries: &[Entry<'a>]) -> Vec<&'a str> {
    entries
        .iter()
        .filter(|e| e.insight.priority() == Priority::P0)
        .map(|e| e.insight.topic())
        .collect()
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write every artifact into `dir` (temp file + rename). Returns the written
/// paths and one error string per file that failed.
pub fn write_artifacts(dir: &Path, artifacts: &Artifacts) -> (Vec<PathBuf>, Vec<String>) {
    let mut written = Vec::new();
    let mut errors = Vec::new();
    if let Err(e) = fs::create_dir_all(dir) {
        errors.push(format!("{}: {e}", dir.display()));
        return (written, errors);
    }
    for (name, bytes) in artifacts.files() {
        let path = dir.join(name);
        match write_atomic(&path, bytes) {
            Ok(()) => written.push(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "artifact write failed");
                errors.push(format!("{}: {e:#}", path.display()));
            }
        }
    }
    (written, errors)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::convergence::enrich;
    use crate::insight::Insight;
    use crate::trust::{TrustTable, TrustTier};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn table() -> TrustTable {
        let mut t = TrustTable::empty()
            .with_source("b", TrustTier::Expert)
            .with_source("c", TrustTier::Crowd);
        t.insert("a", TrustTier::Primary, "Alpha Lab News", "vendor announcements");
        t
    }

    fn sample() -> Vec<EnrichedInsight> {
        let t = table();
        vec![
            enrich(
                Insight::new(InsightKind::Trend, "second p2", "later").with_sources(["a"]),
                &t,
            ),
            enrich(
                Insight::new(InsightKind::Consensus, "converged", "three tiers agree")
                    .with_priority(Priority::P0)
                    .with_confidence(0.9)
                    .with_sources(["a", "b", "c"]),
                &t,
            ),
            enrich(Insight::new(InsightKind::Gap, "silent", "nobody says it"), &t),
        ]
    }

    #[test]
    fn item_ids_are_short_and_stable() {
        let a = item_id("2026-03-10T12:00:00Z", 0, "x");
        assert_eq!(a.len(), 16);
        assert_eq!(a, item_id("2026-03-10T12:00:00Z", 0, "x"));
        assert_ne!(a, item_id("2026-03-10T12:00:00Z", 1, "x"));
    }

    #[test]
    fn groups_by_priority_and_keeps_order_within() {
        let items = sample();
        let entries = ordered(&items, at(), &table());
        let topics: Vec<_> = entries.iter().map(|e| e.insight.topic()).collect();
        assert_eq!(topics, vec!["converged", "second p2", "silent"]);
    }

    #[test]
    fn convergence_block_is_omitted_without_sources() {
        let a = publish(&sample(), at(), &table()).unwrap();
        let feed: serde_json::Value = serde_json::from_slice(&a.feed_json).unwrap();
        let items = feed["items"].as_array().unwrap();
        assert_eq!(items[0]["title"], "[P0] converged");
        assert_eq!(items[0]["_insight"]["convergence"]["tier_count"], 3);
        assert!(items[2]["_insight"].get("convergence").is_none());
        assert_eq!(feed["version"], JSON_FEED_VERSION);
    }

    #[test]
    fn archive_header_lists_counts_and_p0_topics() {
        let a = publish(&sample(), at(), &table()).unwrap();
        let md = String::from_utf8(a.archive_md).unwrap();
        assert!(md.contains("- Insights: 3 (P0: 1, P1: 0, P2: 2)"));
        assert!(md.contains("- P0 topics:\n  - converged\n"));
        let p0 = md.find("## P0").unwrap();
        let p2 = md.find("## P2").unwrap();
        assert!(p0 < p2);
        assert!(!md.contains("## P1"));
    }

    #[test]
    fn rss_uses_priority_title_convention() {
        let a = publish(&sample(), at(), &table()).unwrap();
        let xml = String::from_utf8(a.feed_xml).unwrap();
        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains("<title>[P0] converged</title>"));
        assert!(xml.contains("<rss version=\"2.0\">"));
    }

    #[test]
    fn sources_show_display_names_and_tiers() {
        let a = publish(&sample(), at(), &table()).unwrap();

        let feed: serde_json::Value = serde_json::from_slice(&a.feed_json).unwrap();
        let who = &feed["items"][0]["_insight"]["attribution"];
        assert_eq!(who[0]["id"], "a");
        assert_eq!(who[0]["name"], "Alpha Lab News");
        assert_eq!(who[0]["tier"], "primary");
        assert_eq!(who[2]["tier"], "crowd");
        assert_eq!(feed["items"][0]["_insight"]["sources"][0], "a");

        let xml = String::from_utf8(a.feed_xml).unwrap();
        assert!(xml.contains("Sources: Alpha Lab News (primary), b (expert), c (crowd)"), "{xml}");

        let md = String::from_utf8(a.archive_md).unwrap();
        assert!(md.contains(
            "*consensus | confidence 0.90 | sources: Alpha Lab News (primary), b (expert), c (crowd) | tiers: 3*"
        ), "{md}");

        // Unknown ids fall back to the id itself in the raw tier.
        let b = publish(&sample(), at(), &TrustTable::empty()).unwrap();
        let md = String::from_utf8(b.archive_md).unwrap();
        assert!(md.contains("sources: a (raw), b (raw), c (raw)"), "{md}");
    }

    #[test]
    fn empty_run_still_yields_four_valid_artifacts() {
        let a = publish(&[], at(), &table()).unwrap();
        for (name, bytes) in a.files() {
            assert!(!bytes.is_empty(), "{name} is empty");
        }

        let index: serde_json::Value = serde_json::from_slice(&a.index_json).unwrap();
        assert_eq!(index["counts"]["total"], 0);
        assert_eq!(index["counts"]["by_priority"]["p0"], 0);
        assert_eq!(index["p0_topics"].as_array().map(Vec::len), Some(0));
        assert_eq!(index["links"]["feed_xml"], FEED_XML_FILE);

        let feed: serde_json::Value = serde_json::from_slice(&a.feed_json).unwrap();
        assert_eq!(feed["version"], JSON_FEED_VERSION);
        assert_eq!(feed["items"].as_array().map(Vec::len), Some(0));

        let xml = String::from_utf8(a.feed_xml.clone()).unwrap();
        assert!(xml.starts_with(XML_DECLARATION));
        let mut reader = quick_xml::Reader::from_str(&xml);
        let mut items = 0;
        let mut saw_channel = false;
        loop {
            match reader.read_event().unwrap() {
                quick_xml::events::Event::Start(e) if e.name().as_ref() == b"channel" => {
                    saw_channel = true
                }
                quick_xml::events::Event::Start(e) if e.name().as_ref() == b"item" => items += 1,
                quick_xml::events::Event::Eof => break,
                _ => {}
            }
        }
        assert!(saw_channel);
        assert_eq!(items, 0);

        let md = String::from_utf8(a.archive_md.clone()).unwrap();
        assert!(md.contains("- Insights: 0 (P0: 0, P1: 0, P2: 0)"));
        assert!(md.contains("- P0 topics: none"));
        assert!(md.contains("_No insights in this run._"));

        assert_eq!(publish(&[], at(), &table()).unwrap(), a);
    }
}
