//! Provider trait — the abstraction over the hosted model.
//!
//! A Provider knows how to send a [`Prompt`] to an LLM and get either a
//! complete [`Generation`] back or a stream of text chunks. It also exposes
//! the model's embedding endpoint for the knowledge base.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{ActionRequest, ActionSpec};
use crate::error::ProviderError;
use crate::turn::Prompt;

/// Sampling parameters forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: None,
            max_output_tokens: None,
        }
    }
}

/// Everything the model needs for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: Prompt,
    /// Actions advertised to the model. Empty means the model cannot call any.
    pub actions: Vec<ActionSpec>,
    pub config: GenerationConfig,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: Prompt) -> Self {
        Self {
            model: model.into(),
            prompt,
            actions: Vec::new(),
            config: GenerationConfig::default(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<ActionSpec>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }
}

/// A complete (non-streaming) model answer.
///
/// When the model both writes text and requests an action, the action wins:
/// the text is discarded and the request is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Action(ActionRequest),
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// The core Provider trait.
///
/// The orchestration core calls `generate()` or `stream()` without knowing
/// which backend is used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError>;

    /// Send a request and get a stream of text chunks.
    ///
    /// Default implementation calls `generate()` and wraps the text as a single
    /// chunk. An action request from a streamed call is treated as a malformed
    /// response.
    async fn stream(
        &self,
        request: GenerateRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let text = match self.generate(request).await? {
            Generation::Text(text) => text,
            Generation::Action(req) => {
                return Err(ProviderError::MalformedResponse(format!(
                    "unexpected action request '{}' in a streamed answer",
                    req.name
                )));
            }
        };
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx.send(Ok(StreamChunk::text(text))).await;
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }
}
