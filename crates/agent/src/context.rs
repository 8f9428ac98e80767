//! Prompt assembly.
//!
//! Builds the text of the leading user turn from its layers in a fixed
//! order:
//!
//! 1. **System policy** (persona, reply rules, action rules, today's date)
//! 2. **Retrieved context** (knowledge base passages)
//! 3. **Conversation history** (prior turns, oldest first)
//! 4. **Current page URL** (the page the user is looking at)
//! 5. **Linked page** (text of a page the user linked in the question)
//! 6. **User query**
//!
//! Assembly is deterministic and performs no I/O: retrieval and page
//! fetching happen before, and today's date is fixed at construction.

use chrono::{NaiveDate, Utc};
use sagebot_core::store::{HistoryEntry, StoredRole};
use sagebot_core::turn::Prompt;

const SECTION_RULE: &str = "--------------------";

/// Currency to country code mapping used by the economic calendar rules.
pub const CURRENCY_COUNTRIES: &[(&str, &str)] = &[
    ("EUR", "EU"),
    ("USD", "US"),
    ("GBP", "GB"),
    ("JPY", "JP"),
    ("CAD", "CA"),
    ("AUD", "AU"),
    ("CHF", "CH"),
    ("NZD", "NZ"),
];

/// Everything that goes into one assembled prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInput<'a> {
    pub user_query: &'a str,
    pub history: &'a [HistoryEntry],
    pub page_url: Option<&'a str>,
    /// A URL found in the user query with the text fetched from it.
    pub linked_page: Option<(&'a str, &'a str)>,
    pub retrieved_context: Option<&'a str>,
}

impl<'a> ContextInput<'a> {
    pub fn new(user_query: &'a str) -> Self {
        Self {
            user_query,
            ..Default::default()
        }
    }

    /// The same input without history and retrieved context.
    pub fn without_history(self) -> Self {
        Self {
            history: &[],
            retrieved_context: None,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    today: NaiveDate,
}

impl ContextAssembler {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// An assembler dated today (UTC).
    pub fn for_today() -> Self {
        Self::new(Utc::now().date_naive())
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// The assembled text of the leading user turn.
    pub fn assemble(&self, input: &ContextInput<'_>) -> String {
        let mut sections = vec![self.system_policy()];

        if let Some(context) = input.retrieved_context.filter(|c| !c.trim().is_empty()) {
            sections.push(format!("## Retrieved Context\n{}", context.trim()));
        }

        let history = render_history(input.history);
        if !history.is_empty() {
            sections.push(format!(
                "## Conversation So Far\nPrevious chat between the user and the assistant:\n{history}"
            ));
        }

        if let Some(url) = input.page_url.filter(|u| !u.trim().is_empty()) {
            sections.push(format!("## Current Page\nThe user is viewing: {}", url.trim()));
        }

        if let Some((url, text)) = input.linked_page {
            sections.push(format!(
                "## Linked Page\nThe user linked: {url}\nPage content:\n{text}"
            ));
        }

        sections.push(format!(
            "{SECTION_RULE}\nNew user question:\n{}\n{SECTION_RULE}",
            input.user_query
        ));

        sections.join("\n\n")
    }

    /// The assembled prompt, ready for the first model call.
    pub fn prompt(&self, input: &ContextInput<'_>) -> Prompt {
        Prompt::new(self.assemble(input))
    }

    fn system_policy(&self) -> String {
        let mapping = CURRENCY_COUNTRIES
            .iter()
            .map(|(currency, country)| format!("{currency} -> {country}"))
            .collect::<Vec<_>>()
            .join(" | ");

        format!(
            "## System Policy\n\
             You are SafeGPT, the official assistant of SafeBroker.org.\n\
             LANGUAGE: Always reply in the same language as the user. If the user writes in \
             Persian (Farsi), or mixes Persian with English terms, reply in Persian.\n\
             CONCISENESS: Be extremely concise. Keep answers under 3-4 sentences.\n\
             ENGAGEMENT: Never end with a full stop. End with a relevant follow-up question or \
             a suggestion that keeps the conversation going.\n\
             ACTIONS: If the user asks about the current web page, call scrapePage. Use \
             searchKnowledgeBase for questions about brokers, trading or this website that the \
             retrieved context does not answer. If the retrieved context says no relevant \
             documents were found, answer from common knowledge.\n\
             \n\
             [CONTEXTUAL_RULES]\n\
             Today's date (YYYY-MM-DD) is {today}.\n\
             Rules for calling getForexEconomicNews:\n\
             1. Convert relative time expressions such as \"this week\" or \"next week\" into an \
             exact YYYY-MM-DD date range using today's date. Weeks start on Monday.\n\
             2. Map currencies to these country codes and pass them as countryCodes: {mapping}.\n\
             [/CONTEXTUAL_RULES]",
            today = self.today.format("%Y-%m-%d"),
        )
    }
}

/// Render prior turns as `User:` / `Assistant:` lines, oldest first.
pub fn render_history(history: &[HistoryEntry]) -> String {
    history
        .iter()
        .filter_map(|entry| match entry.role {
            StoredRole::User => Some(format!("User: {}", entry.text)),
            StoredRole::Bot => Some(format!("Assistant: {}", entry.text)),
            StoredRole::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
