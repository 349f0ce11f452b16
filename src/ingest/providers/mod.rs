// src/ingest/providers/mod.rs
pub mod rss;

pub use rss::RssProvider;

use crate::ingest::config::FeedConfig;
use crate::ingest::types::SourceProvider;

/// One provider per feed that has a URL. Feeds without one are listed for
/// trust lookup only and are filled by other means.
pub fn from_feeds(feeds: &[FeedConfig]) -> Vec<Box<dyn SourceProvider>> {
    feeds
        .iter()
        .filter_map(RssProvider::from_feed)
        .map(|p| Box::new(p) as Box<dyn SourceProvider>)
        .collect()
}
