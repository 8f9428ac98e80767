//! `scrapePage` — read the text of a web page.

use async_trait::async_trait;
use sagebot_core::action::{ActionHandler, ActionSpec, FieldSpec, FieldType, ValidatedArgs, payload_of};
use sagebot_core::error::ActionError;
use sagebot_core::page::PageFetcher;
use serde::Serialize;
use std::sync::Arc;

pub const NAME: &str = "scrapePage";

pub struct ScrapePageAction {
    fetcher: Arc<dyn PageFetcher>,
}

#[derive(Debug, Serialize)]
struct ScrapedPage {
    url: String,
    text: String,
}

impl ScrapePageAction {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn spec() -> ActionSpec {
        ActionSpec::new(NAME, "Scrape webpage HTML and return readable text").field(
            FieldSpec::required("url", FieldType::String)
                .describe("Absolute http(s) URL of the page to read"),
        )
    }
}

#[async_trait]
impl ActionHandler for ScrapePageAction {
    async fn call(&self, args: ValidatedArgs) -> Result<serde_json::Value, ActionError> {
        let url = args.str("url").unwrap_or_default().trim();

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ActionError::failure(
                NAME,
                format!("'{url}' is not an http(s) URL"),
            ));
        }

        let text = self
            .fetcher
            .fetch(url)
            .await
            .ok_or_else(|| ActionError::failure(NAME, format!("could not fetch {url}")))?;

        Ok(payload_of(&ScrapedPage {
            url: url.to_string(),
            text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubFetcher(Option<&'static str>);

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> Option<String> {
            self.0.map(String::from)
        }
    }

    fn args(url: &str) -> ValidatedArgs {
        ScrapePageAction::spec()
            .validate(serde_json::json!({ "url": url }).as_object().unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn returns_page_text() {
        let action = ScrapePageAction::new(Arc::new(StubFetcher(Some("Open MT4 and click Insert"))));
        let out = action.call(args("https://safebroker.org/blog/x")).await.unwrap();
        assert_eq!(out["url"], "https://safebroker.org/blog/x");
        assert_eq!(out["text"], "Open MT4 and click Insert");
    }

    #[tokio::test]
    async fn unreachable_page_is_handler_failure() {
        let action = ScrapePageAction::new(Arc::new(StubFetcher(None)));
        let err = action.call(args("https://down.example")).await.unwrap_err();
        assert!(matches!(err, ActionError::HandlerFailure { .. }));
    }

    #[tokio::test]
    async fn non_http_url_is_handler_failure() {
        let action = ScrapePageAction::new(Arc::new(StubFetcher(Some("x"))));
        let err = action.call(args("file:///etc/passwd")).await.unwrap_err();
        assert!(err.to_string().contains("not an http(s) URL"));
    }
}
