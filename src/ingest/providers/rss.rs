// src/ingest/providers/rss.rs
//! Generic RSS 2.0 provider: one instance per curated feed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::config::FeedConfig;
use crate::ingest::types::{normalize_source, AuthorKind, Signal, SourceProvider};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

/// Element whose attributes we ignore (`<guid isPermaLink=..>`, `<category domain=..>`).
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator")]
    creator: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<TextNode>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), 0)
}

pub struct RssProvider {
    id: String,
    tags: Vec<String>,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssProvider {
    /// HTTP provider for a curated feed. `None` when the feed has no URL.
    pub fn from_feed(feed: &FeedConfig) -> Option<Self> {
        let url = feed.url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("signal-radar/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Some(Self {
            id: feed.id.clone(),
            tags: feed.tags.clone(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        })
    }

    /// Parses a fixed XML document instead of fetching.
    pub fn from_fixture_str(id: &str, tags: &[&str], xml: &str) -> Self {
        Self {
            id: normalize_source(id),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    fn parse_items_from_str(&self, s: &str, observed_at: DateTime<Utc>) -> Result<Vec<Signal>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss =
            from_str(&xml_clean).with_context(|| format!("parsing rss xml for {}", self.id))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = crate::ingest::normalize_text(it.title.as_deref().unwrap_or_default());
            let body = crate::ingest::normalize_text(it.description.as_deref().unwrap_or_default());
            if title.is_empty() && body.is_empty() {
                continue;
            }

            let link = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
            let guid = it.guid.map(|g| g.value.trim().to_string()).filter(|g| !g.is_empty());
            let natural_id = guid
                .or_else(|| link.clone())
                .unwrap_or_else(|| short_hash(&title));

            let tags = self
                .tags
                .iter()
                .map(String::as_str)
                .chain(it.categories.iter().map(|c| c.value.as_str()));

            let mut sig = Signal::new(&self.id, natural_id, title, observed_at)
                .with_body(body)
                .with_tags(tags);
            if let Some(l) = link {
                sig = sig.with_url(l);
            }
            if let Some(a) = it.creator.or(it.author).filter(|a| !a.trim().is_empty()) {
                sig = sig.with_author(a.trim(), AuthorKind::Human);
            }
            if let Some(p) = it.pub_date.as_deref().and_then(parse_rfc2822) {
                sig = sig.published(p);
            }
            out.push(sig);
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("signals_fetched_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<Signal>> {
        let now = Utc::now();
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s, now),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.id))?
                    .error_for_status()
                    .with_context(|| format!("{} http status", self.id))?;
                let body = resp
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.id))?;
                self.parse_items_from_str(&body, now)
            }
        }
    }

    fn name(&self) -> &str {
        &self.id
    }
}

/// Fallback id for items with neither guid nor link.
fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// HTML entities that are not valid XML and would break the parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
