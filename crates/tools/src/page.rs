//! Page fetching and HTML-to-text helpers.

use async_trait::async_trait;
use regex_lite::Regex;
use sagebot_core::page::PageFetcher;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<!--.*?-->")
        .expect("static pattern")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[^>]+>").expect("static pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("static pattern"));

/// Reduce an HTML document to readable text.
///
/// Scripts, styles and comments are dropped with their content, remaining
/// tags are removed, common entities decoded and whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = TAG.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// The first http(s) URL in `text`, if any.
pub fn extract_url(text: &str) -> Option<&str> {
    URL.find(text).map(|m| m.as_str())
}

/// At most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Fetches pages over HTTP and returns their stripped text.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self { client, max_chars })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "Page fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url, status = response.status().as_u16(), "Page fetch returned error status");
            return None;
        }

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "Page body could not be read");
                return None;
            }
        };

        let text = truncate_chars(&strip_html(&html), self.max_chars);
        debug!(url, chars = text.chars().count(), "Page fetched");
        Some(text)
    }
}
