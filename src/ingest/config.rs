// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::trust::TrustTier;

pub const ENV_FEEDS_PATH: &str = "SIGNAL_RADAR_FEEDS_PATH";
pub const DEFAULT_FEEDS_PATH: &str = "config/feeds.toml";

/// Shipped feed list, compiled in so a bare binary still knows its sources.
const BUILTIN_FEEDS: &str = include_str!("../../config/feeds.toml");

/// One curated feed: where to fetch it and how far to trust it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    pub id: String,
    pub display_name: String,
    pub tier: TrustTier,
    /// One-line editorial angle shown to the synthesis step.
    #[serde(default)]
    pub angle: String,
    /// Tags attached to every signal from this feed, before item categories.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Load feeds from an explicit path. Supports TOML or JSON formats.
pub fn load_feeds_from(path: &Path) -> Result<Vec<FeedConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str())
}

/// Load feeds using env var + fallbacks:
/// 1) $SIGNAL_RADAR_FEEDS_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) the built-in list
pub fn load_feeds_default() -> Result<Vec<FeedConfig>> {
    if let Ok(p) = std::env::var(ENV_FEEDS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        } else {
            return Err(anyhow!("{ENV_FEEDS_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_FEEDS_PATH);
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    builtin_feeds()
}

pub fn builtin_feeds() -> Result<Vec<FeedConfig>> {
    parse_feeds(BUILTIN_FEEDS, "toml")
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<FeedConfig>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[feeds]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    // Re-run the hinted parser to surface its error message.
    let retry = match hint_ext {
        "json" => parse_json(s),
        _ => parse_toml(s),
    };
    retry.context("unsupported feeds format")
}

fn parse_toml(s: &str) -> Result<Vec<FeedConfig>> {
    #[derive(Deserialize)]
    struct TomlFeeds {
        #[serde(default)]
        feeds: Vec<FeedConfig>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<FeedConfig>> {
    let v: Vec<FeedConfig> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim ids, drop empty ones, keep the last definition of a duplicated id.
fn clean_list(items: Vec<FeedConfig>) -> Vec<FeedConfig> {
    let mut out: Vec<FeedConfig> = Vec::with_capacity(items.len());
    for mut it in items {
        it.id = crate::ingest::types::normalize_source(&it.id);
        if it.id.is_empty() {
            continue;
        }
        if it.display_name.trim().is_empty() {
            it.display_name = it.id.clone();
        }
        it.tags = crate::ingest::types::normalize_tags(&it.tags);
        if let Some(pos) = out.iter().position(|f| f.id == it.id) {
            out.remove(pos);
        }
        out.push(it);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn builtin_list_parses() {
        let feeds = builtin_feeds().unwrap();
        assert!(!feeds.is_empty());
        assert!(feeds.iter().all(|f| !f.id.is_empty()));
    }

    #[test]
    fn builtin_urls_are_rss_not_atom() {
        let feeds = builtin_feeds().unwrap();
        let simon = feeds.iter().find(|f| f.id == "simonwillison").unwrap();
        assert!(simon.url.is_none());
        for f in &feeds {
            if let Some(url) = &f.url {
                assert!(!url.contains("/atom"), "{} points at an Atom feed: {url}", f.id);
            }
        }
    }

    #[test]
    fn dedup_trim_and_formats_work() {
        let toml = r#"
[[feeds]]
id = " Lab-Notes "
display_name = ""
tier = "expert"

[[feeds]]
id = ""
display_name = "nothing"
tier = "crowd"

[[feeds]]
id = "lab-notes"
display_name = "Lab Notes"
tier = "primary"
tags = ["AI", "ai"]
"#;
        let out = parse_toml(toml).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "lab-notes");
        assert_eq!(out[0].tier, TrustTier::Primary);
        assert_eq!(out[0].tags, vec!["ai".to_string()]);

        let json = r#"[{"id":"wire","display_name":"","tier":"editorial"}]"#;
        let out = parse_json(json).unwrap();
        assert_eq!(out[0].display_name, "wire");
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_FEEDS_PATH);

        // No files in the temp CWD: built-in list.
        let v = load_feeds_default().unwrap();
        assert_eq!(v, builtin_feeds().unwrap());

        // Env wins.
        let p_json = tmp.path().join("feeds.json");
        fs::write(&p_json, r#"[{"id":"x","display_name":"X","tier":"crowd"}]"#).unwrap();
        env::set_var(ENV_FEEDS_PATH, p_json.display().to_string());
        let v2 = load_feeds_default().unwrap();
        assert_eq!(v2.len(), 1);
        assert_eq!(v2[0].id, "x");
        env::remove_var(ENV_FEEDS_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
