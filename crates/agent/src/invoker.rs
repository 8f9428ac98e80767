//! Single model calls.

use sagebot_core::action::ActionSpec;
use sagebot_core::error::ProviderError;
use sagebot_core::provider::{GenerateRequest, Generation, GenerationConfig, Provider, StreamChunk};
use sagebot_core::turn::Prompt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::debug;

/// Issues one model call per method invocation. Never retries; wrap calls
/// in a [`RetryPolicy`](crate::RetryPolicy) for that.
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
    model: String,
    config: GenerationConfig,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            config: GenerationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn request(&self, prompt: &Prompt, actions: &[ActionSpec]) -> GenerateRequest {
        GenerateRequest::new(&self.model, prompt.clone())
            .with_actions(actions.to_vec())
            .with_config(self.config.clone())
    }

    /// Either the model's text or the action it asks for, never both.
    pub async fn invoke(
        &self,
        prompt: &Prompt,
        actions: &[ActionSpec],
    ) -> Result<Generation, ProviderError> {
        debug!(
            provider = self.provider.name(),
            model = %self.model,
            turns = prompt.len(),
            actions = actions.len(),
            "Invoking model"
        );
        self.provider.generate(self.request(prompt, actions)).await
    }

    /// Open a streaming call. Chunks arrive on the returned receiver.
    pub async fn open_stream(
        &self,
        prompt: &Prompt,
        actions: &[ActionSpec],
    ) -> Result<Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        debug!(
            provider = self.provider.name(),
            model = %self.model,
            turns = prompt.len(),
            actions = actions.len(),
            "Opening model stream"
        );
        self.provider.stream(self.request(prompt, actions)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sagebot_core::action::ActionRequest;
    use std::sync::Mutex;

    struct Capturing {
        seen: Mutex<Vec<GenerateRequest>>,
    }

    #[async_trait]
    impl Provider for Capturing {
        fn name(&self) -> &str {
            "capturing"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
            let wants_action = !request.actions.is_empty();
            self.seen.lock().unwrap().push(request);
            Ok(if wants_action {
                Generation::Action(ActionRequest::new(
                    "getAssetPrice",
                    serde_json::json!({"symbol": "XAU/USD"}),
                ))
            } else {
                Generation::Text("plain".into())
            })
        }
    }

    #[tokio::test]
    async fn forwards_model_actions_and_config() {
        let provider = Arc::new(Capturing {
            seen: Mutex::new(vec![]),
        });
        let invoker = ModelInvoker::new(provider.clone(), "gemini-2.5-flash").with_config(
            GenerationConfig {
                temperature: 0.2,
                top_p: Some(0.9),
                max_output_tokens: Some(512),
            },
        );
        let spec = ActionSpec::new("getAssetPrice", "price");

        let out = invoker
            .invoke(&Prompt::new("gold?"), std::slice::from_ref(&spec))
            .await
            .unwrap();
        assert!(matches!(out, Generation::Action(ref r) if r.name == "getAssetPrice"));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model, "gemini-2.5-flash");
        assert_eq!(seen[0].config.max_output_tokens, Some(512));
        assert_eq!(seen[0].actions.len(), 1);
    }

    #[tokio::test]
    async fn default_stream_wraps_text() {
        let provider = Arc::new(Capturing {
            seen: Mutex::new(vec![]),
        });
        let invoker = ModelInvoker::new(provider, "m");
        let mut rx = invoker.open_stream(&Prompt::new("hi"), &[]).await.unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("plain"));
        assert!(rx.recv().await.unwrap().unwrap().done);
    }
}
