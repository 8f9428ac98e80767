//! Built-in actions for sagebot.
//!
//! Actions give the model access to the outside world: reading a web
//! page, quoting a live asset price, listing economic calendar events and
//! searching the knowledge base.

pub mod asset_price;
pub mod economic_news;
pub mod knowledge_search;
pub mod page;
pub mod scrape_page;

use sagebot_config::AppConfig;
use sagebot_core::action::ActionRegistry;
use sagebot_core::knowledge::KnowledgeBase;
use sagebot_core::page::PageFetcher;
use std::sync::Arc;
use std::time::Duration;

pub use asset_price::AssetPriceAction;
pub use economic_news::EconomicNewsAction;
pub use knowledge_search::KnowledgeSearchAction;
pub use page::{HttpPageFetcher, extract_url, strip_html, truncate_chars};
pub use scrape_page::ScrapePageAction;

/// Build the registry with every built-in action.
///
/// The page fetcher and knowledge base are injected so callers (and
/// tests) decide how pages are read and where passages come from.
pub fn default_registry(
    config: &AppConfig,
    knowledge: Arc<dyn KnowledgeBase>,
    fetcher: Arc<dyn PageFetcher>,
) -> sagebot_core::Result<ActionRegistry> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.market.http_timeout_secs))
        .build()
        .map_err(|e| sagebot_core::Error::Internal(format!("HTTP client: {e}")))?;

    let mut registry = ActionRegistry::new();
    registry.register(
        ScrapePageAction::spec(),
        Arc::new(ScrapePageAction::new(fetcher)),
    );
    registry.register(
        AssetPriceAction::spec(),
        Arc::new(AssetPriceAction::new(
            client.clone(),
            config.market.price_api_url.clone(),
            config.market.price_api_key.clone(),
        )),
    );
    registry.register(
        EconomicNewsAction::spec(),
        Arc::new(EconomicNewsAction::new(
            client,
            config.market.calendar_url.clone(),
        )),
    );
    registry.register(
        KnowledgeSearchAction::spec(),
        Arc::new(KnowledgeSearchAction::new(knowledge, config.turn.retrieval_k)),
    );
    Ok(registry)
}
