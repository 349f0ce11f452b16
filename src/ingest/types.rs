// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an observation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorKind {
    #[default]
    Human,
    Agent,
}

/// One timestamped observation from a source.
///
/// `(source, natural_id)` is the identity key: stores treat a second insert of
/// the same pair as a no-op and never overwrite stored content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signal {
    pub source: String,     // lower-cased, e.g. "hackernews"
    pub natural_id: String, // source-scoped id (guid, link, post id)
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_kind: AuthorKind,
    /// Upvotes, citations, stars. 0 when unknown.
    #[serde(default)]
    pub weight: u64,
    /// Ordered set, lower-cased. The first entry is the primary tag.
    #[serde(default)]
    pub tags: Vec<String>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn new(
        source: impl AsRef<str>,
        natural_id: impl Into<String>,
        title: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: normalize_source(source.as_ref()),
            natural_id: natural_id.into(),
            title: title.into(),
            body: String::new(),
            url: None,
            author: None,
            author_kind: AuthorKind::Human,
            weight: 0,
            tags: Vec::new(),
            observed_at,
            published_at: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>, kind: AuthorKind) -> Self {
        self.author = Some(author.into());
        self.author_kind = kind;
        self
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    /// First tag, or the `general` bucket.
    pub fn primary_tag(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or(GENERAL_TAG)
    }

    /// Identity key used for idempotent ingestion.
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.natural_id)
    }
}

/// Fallback bucket for signals without tags.
pub const GENERAL_TAG: &str = "general";

/// Source ids are compared trimmed and lower-cased everywhere.
pub fn normalize_source(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Trim, lower-case, drop empties and duplicates while keeping first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for t in tags {
        let t = t.as_ref().trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<Signal>>;
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_an_ordered_case_insensitive_set() {
        let s = Signal::new("HN", "1", "t", Utc::now()).with_tags([" Rust", "rust", "", "LLM"]);
        assert_eq!(s.tags, vec!["rust".to_string(), "llm".to_string()]);
        assert_eq!(s.primary_tag(), "rust");
        assert_eq!(s.source, "hn");
    }

    #[test]
    fn missing_tags_fall_back_to_general() {
        let s = Signal::new("reddit", "x", "t", Utc::now());
        assert_eq!(s.primary_tag(), GENERAL_TAG);
    }
}
