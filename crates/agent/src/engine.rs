//! One user turn, end to end.
//!
//! 1. **Retrieve** knowledge base passages for the query (if configured)
//! 2. **Fetch** a page the user linked in the query (if any)
//! 3. **Assemble** the prompt
//! 4. **Invoke** the model with the action declarations attached
//! 5. **No action**: stream the same prompt to the caller, without actions.
//!    An empty stream falls back to the first answer.
//! 6. **Action**: execute it, build the follow-up, stream that instead
//!
//! The whole turn runs under a deadline. When it expires the caller gets a
//! terminal error instead of waiting on a hung upstream call.

use chrono::NaiveDate;
use sagebot_config::AppConfig;
use sagebot_core::action::{ActionRegistry, ActionResult};
use sagebot_core::error::{ErrorCategory, ProviderError, TurnError};
use sagebot_core::knowledge::{KnowledgeBase, format_context};
use sagebot_core::page::PageFetcher;
use sagebot_core::provider::{Generation, Provider};
use sagebot_core::store::HistoryEntry;
use sagebot_tools::{extract_url, truncate_chars};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{ContextAssembler, ContextInput};
use crate::continuation::build_followup;
use crate::executor::ActionExecutor;
use crate::invoker::ModelInvoker;
use crate::relay::{StreamRelay, StreamSink};
use crate::retry::RetryPolicy;

/// The caller's side of a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub query: String,
    /// Prior messages of the session, oldest first.
    pub history: Vec<HistoryEntry>,
    /// The page the user is looking at.
    pub page_url: Option<String>,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The full answer was streamed.
    Answered {
        text: String,
        /// The action run along the way, if the model asked for one.
        action: Option<ActionResult>,
    },
    /// The turn failed; `partial` is whatever was streamed before.
    Failed { error: TurnError, partial: String },
}

impl TurnOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered { .. })
    }

    /// The answer, or the partial text of a failed turn.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { text, .. } => text,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Answered { .. } => None,
            Self::Failed { error, .. } => Some(error.category()),
        }
    }
}

pub struct TurnEngine {
    invoker: ModelInvoker,
    executor: ActionExecutor,
    retry: RetryPolicy,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    retrieval_k: usize,
    fetcher: Option<Arc<dyn PageFetcher>>,
    page_text_limit: usize,
    deadline: Duration,
    followup_carries_history: bool,
    today: Option<NaiveDate>,
}

impl TurnEngine {
    pub fn new(invoker: ModelInvoker, registry: Arc<ActionRegistry>) -> Self {
        Self {
            invoker,
            executor: ActionExecutor::new(registry),
            retry: RetryPolicy::default(),
            knowledge: None,
            retrieval_k: 5,
            fetcher: None,
            page_text_limit: 30_000,
            deadline: Duration::from_secs(60),
            followup_carries_history: true,
            today: None,
        }
    }

    /// Build an engine from the application config.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ActionRegistry>,
        knowledge: Arc<dyn KnowledgeBase>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let invoker = ModelInvoker::new(provider, &config.model)
            .with_config(config.generation.to_generation_config());

        Self::new(invoker, registry)
            .with_retry(RetryPolicy::from_settings(&config.retry))
            .with_knowledge(knowledge, config.turn.retrieval_k)
            .with_page_fetcher(fetcher, config.turn.page_text_limit)
            .with_deadline(Duration::from_secs(config.turn.deadline_secs))
            .with_followup_history(config.turn.followup_carries_history)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retrieve `k` passages per turn and put them into the prompt.
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>, k: usize) -> Self {
        self.knowledge = Some(knowledge);
        self.retrieval_k = k;
        self
    }

    /// Fetch pages linked in the query, keeping at most `limit` characters.
    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>, limit: usize) -> Self {
        self.fetcher = Some(fetcher);
        self.page_text_limit = limit;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Whether the follow-up carries history and retrieved context.
    pub fn with_followup_history(mut self, enabled: bool) -> Self {
        self.followup_carries_history = enabled;
        self
    }

    /// Pin the date the prompt reports as today.
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.executor.registry()
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    /// Run one turn, streaming into `sink`.
    ///
    /// The sink receives zero or more chunks followed by exactly one of
    /// `on_end` or `on_error`.
    pub async fn run(&self, request: &TurnRequest, sink: &mut dyn StreamSink) -> TurnOutcome {
        info!(
            model = self.invoker.model(),
            history = request.history.len(),
            "Processing turn"
        );

        let mut relay = StreamRelay::new(sink);
        let driven = tokio::time::timeout(self.deadline, self.drive(request, &mut relay)).await;
        let result =
            driven.unwrap_or_else(|_| Err(TurnError::DeadlineExceeded(self.deadline.as_secs())));

        match result {
            Ok(action) => {
                let text = relay.end().await;
                info!(chars = text.chars().count(), "Turn answered");
                TurnOutcome::Answered { text, action }
            }
            Err(error) => {
                warn!(category = ?error.category(), error = %error, "Turn failed");
                let partial = relay.fail(&error).await;
                TurnOutcome::Failed { error, partial }
            }
        }
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        relay: &mut StreamRelay<'_>,
    ) -> Result<Option<ActionResult>, TurnError> {
        let retrieved = self.retrieve(&request.query).await;
        let linked = self.fetch_linked_page(&request.query).await;

        let assembler = self.assembler();
        let input = ContextInput {
            user_query: &request.query,
            history: &request.history,
            page_url: request.page_url.as_deref(),
            linked_page: linked.as_ref().map(|(url, text)| (url.as_str(), text.as_str())),
            retrieved_context: retrieved.as_deref(),
        };
        let prompt = assembler.prompt(&input);
        let actions = self.executor.registry().describe();

        let first = self
            .retry
            .run(|| self.invoker.invoke(&prompt, &actions))
            .await?;

        match first {
            Generation::Text(draft) => {
                debug!("No action requested, streaming the answer");
                let rx = self
                    .retry
                    .run(|| self.invoker.open_stream(&prompt, &[]))
                    .await?;
                relay.drain(rx).await?;
                if relay.chunks() == 0 {
                    if draft.trim().is_empty() {
                        return Err(empty_answer());
                    }
                    warn!("Answer stream was empty, relaying the first answer");
                    relay.forward(&draft).await?;
                }
                Ok(None)
            }
            Generation::Action(action) => {
                info!(action = %action.name, "Model requested an action");
                let result = self.executor.execute(&action).await?;

                let base = if self.followup_carries_history {
                    prompt
                } else {
                    assembler.prompt(&input.without_history())
                };
                let followup = build_followup(&base, &action, &result);

                let rx = self
                    .retry
                    .run(|| self.invoker.open_stream(&followup, &[]))
                    .await?;
                relay.drain(rx).await?;
                if relay.chunks() == 0 {
                    return Err(empty_answer());
                }
                Ok(Some(result))
            }
        }
    }

    fn assembler(&self) -> ContextAssembler {
        match self.today {
            Some(today) => ContextAssembler::new(today),
            None => ContextAssembler::for_today(),
        }
    }

    /// Formatted passages, or `None` when retrieval is off or failed.
    async fn retrieve(&self, query: &str) -> Option<String> {
        let knowledge = self.knowledge.as_ref()?;
        match knowledge.search(query, self.retrieval_k).await {
            Ok(passages) => {
                debug!(kb = knowledge.name(), passages = passages.len(), "Retrieved context");
                Some(format_context(&passages))
            }
            Err(e) => {
                warn!(kb = knowledge.name(), error = %e, "Retrieval failed, continuing without context");
                None
            }
        }
    }

    /// The first URL in the query and its text. A failed fetch is skipped.
    async fn fetch_linked_page(&self, query: &str) -> Option<(String, String)> {
        let fetcher = self.fetcher.as_ref()?;
        let url = extract_url(query)?;
        debug!(url, "Fetching linked page");
        let text = fetcher.fetch(url).await?;
        Some((url.to_string(), truncate_chars(&text, self.page_text_limit)))
    }
}

fn empty_answer() -> TurnError {
    TurnError::Upstream(ProviderError::MalformedResponse(
        "model streamed an empty answer".into(),
    ))
}
