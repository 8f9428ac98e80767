//! `getForexEconomicNews` — economic calendar events in a date window.

use async_trait::async_trait;
use chrono::NaiveDate;
use sagebot_core::action::{
    ActionHandler, ActionSpec, FieldSpec, FieldType, ValidatedArgs, payload_of,
};
use sagebot_core::error::ActionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const NAME: &str = "getForexEconomicNews";

const CALENDAR_ORIGIN: &str = "https://in.tradingview.com";

pub struct EconomicNewsAction {
    client: reqwest::Client,
    calendar_url: String,
}

/// One simplified calendar event handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomicEvent {
    pub title: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub importance: i64,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomicCalendar {
    pub start_date: String,
    pub end_date: String,
    pub count: usize,
    pub events: Vec<EconomicEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiCalendar {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    importance: i64,
    #[serde(default)]
    date: String,
    #[serde(default)]
    actual: Option<serde_json::Value>,
    #[serde(default)]
    forecast: Option<serde_json::Value>,
    #[serde(default)]
    previous: Option<serde_json::Value>,
}

impl From<ApiEvent> for EconomicEvent {
    fn from(e: ApiEvent) -> Self {
        let present = |v: Option<serde_json::Value>| v.filter(|v| !v.is_null());
        Self {
            title: e.title,
            country: e.country,
            currency: e.currency,
            importance: e.importance,
            date: e.date,
            actual: present(e.actual),
            forecast: present(e.forecast),
            previous: present(e.previous),
        }
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ActionError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ActionError::failure(
            NAME,
            format!("{field} '{value}' is not a date in YYYY-MM-DD format"),
        )
    })
}

/// Normalizes `"us, eu"` into `"US,EU"`; `None` when nothing usable remains.
fn normalize_countries(raw: &str) -> Option<String> {
    let codes: Vec<String> = raw
        .split(',')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    (!codes.is_empty()).then(|| codes.join(","))
}

impl EconomicNewsAction {
    pub fn new(client: reqwest::Client, calendar_url: impl Into<String>) -> Self {
        Self {
            client,
            calendar_url: calendar_url.into(),
        }
    }

    pub fn spec() -> ActionSpec {
        ActionSpec::new(
            NAME,
            "Retrieves economic calendar events and news for a date range, optionally filtered by country.",
        )
        .field(
            FieldSpec::required("startDate", FieldType::String)
                .describe("Start date in YYYY-MM-DD format."),
        )
        .field(
            FieldSpec::required("endDate", FieldType::String)
                .describe("End date in YYYY-MM-DD format."),
        )
        .field(
            FieldSpec::optional("countryCodes", FieldType::String).describe(
                "Comma-separated country codes (e.g. 'US,EU,GB'). Omit for all countries.",
            ),
        )
    }
}

#[async_trait]
impl ActionHandler for EconomicNewsAction {
    async fn call(&self, args: ValidatedArgs) -> Result<serde_json::Value, ActionError> {
        let start = parse_date("startDate", args.str("startDate").unwrap_or_default())?;
        let end = parse_date("endDate", args.str("endDate").unwrap_or_default())?;
        if end < start {
            return Err(ActionError::failure(
                NAME,
                format!("endDate {end} is before startDate {start}"),
            ));
        }

        let mut query = vec![
            ("from", format!("{start}T00:00:00.000Z")),
            ("to", format!("{end}T23:59:59.000Z")),
        ];
        if let Some(countries) = args.str("countryCodes").and_then(normalize_countries) {
            query.push(("countries", countries));
        }

        debug!(%start, %end, "Fetching economic calendar");

        let response = self
            .client
            .get(&self.calendar_url)
            .header(reqwest::header::ORIGIN, CALENDAR_ORIGIN)
            .query(&query)
            .send()
            .await
            .map_err(|e| ActionError::failure(NAME, format!("calendar request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ActionError::failure(
                NAME,
                format!("calendar service returned HTTP {}", response.status().as_u16()),
            ));
        }

        let body: ApiCalendar = response.json().await.map_err(|e| {
            ActionError::failure(NAME, format!("unreadable calendar response: {e}"))
        })?;

        if let Some(status) = body.status.as_deref()
            && status != "ok"
        {
            return Err(ActionError::failure(
                NAME,
                format!("calendar service reported status '{status}'"),
            ));
        }

        let events: Vec<EconomicEvent> = body.result.into_iter().map(Into::into).collect();
        Ok(payload_of(&EconomicCalendar {
            start_date: start.to_string(),
            end_date: end.to_string(),
            count: events.len(),
            events,
        }))
    }
}
