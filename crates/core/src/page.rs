//! Page fetching capability used for linked-page context and `scrapePage`.

use async_trait::async_trait;

/// Fetches a URL and returns its readable text.
///
/// Failures (network errors, non-success statuses, timeouts) yield `None`;
/// callers decide whether a missing page matters.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<String>;
}
