//! `getAssetPrice` — live quote lookup against the Twelve Data price endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sagebot_core::action::{
    ActionHandler, ActionSpec, ArgValue, FieldSpec, FieldType, ValidatedArgs, payload_of,
};
use sagebot_core::error::ActionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const NAME: &str = "getAssetPrice";
pub const DEFAULT_SYMBOL: &str = "XAU/USD";

pub struct AssetPriceAction {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// A live quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub found: bool,
    pub symbol: String,
    pub price: f64,
    pub retrieved_at: DateTime<Utc>,
}

/// Returned when the provider does not know the symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceNotFound {
    pub found: bool,
    pub symbol: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ApiPrice {
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

impl AssetPriceAction {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn spec() -> ActionSpec {
        ActionSpec::new(
            NAME,
            "Fetches the current real-time price for a specific asset symbol, like 'XAU/USD' for Gold Ounce (Oz) in USD.",
        )
        .field(
            FieldSpec::required("symbol", FieldType::String)
                .describe(
                    "The symbol for the asset (e.g., 'XAU/USD' for Gold, 'EUR/USD' for Euro/Dollar). \
                     Default to 'XAU/USD' if the user asks about the price of gold.",
                )
                .with_default(ArgValue::String(DEFAULT_SYMBOL.into())),
        )
    }
}

#[async_trait]
impl ActionHandler for AssetPriceAction {
    async fn call(&self, args: ValidatedArgs) -> Result<serde_json::Value, ActionError> {
        let symbol = args
            .str("symbol")
            .unwrap_or(DEFAULT_SYMBOL)
            .trim()
            .to_uppercase();

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ActionError::failure(NAME, "price API key is not configured"))?;

        debug!(symbol = %symbol, "Fetching asset price");

        let response = self
            .client
            .get(format!("{}/price", self.base_url))
            .query(&[("symbol", symbol.as_str()), ("apikey", api_key)])
            .send()
            .await
            .map_err(|e| ActionError::failure(NAME, format!("price request failed: {e}")))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(ActionError::failure(
                NAME,
                format!("price service returned HTTP {status}"),
            ));
        }

        let body: ApiPrice = response
            .json()
            .await
            .map_err(|e| ActionError::failure(NAME, format!("unreadable price response: {e}")))?;

        match (body.price, body.code) {
            (Some(price), _) => {
                let price: f64 = price.trim().parse().map_err(|_| {
                    ActionError::failure(NAME, format!("invalid price value '{price}'"))
                })?;
                Ok(payload_of(&PriceQuote {
                    found: true,
                    symbol,
                    price,
                    retrieved_at: Utc::now(),
                }))
            }
            (None, Some(400 | 404)) => Ok(payload_of(&PriceNotFound {
                found: false,
                symbol,
                message: body.message.unwrap_or_else(|| "symbol not found".into()),
            })),
            (None, code) => Err(ActionError::failure(
                NAME,
                format!(
                    "price service error{}: {}",
                    code.map(|c| format!(" {c}")).unwrap_or_default(),
                    body.message.unwrap_or_default()
                ),
            )),
        }
    }
}
