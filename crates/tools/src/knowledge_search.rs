//! `searchKnowledgeBase` — retrieval exposed as an action.

use async_trait::async_trait;
use sagebot_core::action::{ActionHandler, ActionSpec, FieldSpec, FieldType, ValidatedArgs};
use sagebot_core::error::ActionError;
use sagebot_core::knowledge::{KnowledgeBase, format_context};
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "searchKnowledgeBase";

/// Upper bound on passages per call, whatever the model asks for.
pub const MAX_K: usize = 20;

pub struct KnowledgeSearchAction {
    knowledge: Arc<dyn KnowledgeBase>,
    default_k: usize,
}

impl KnowledgeSearchAction {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>, default_k: usize) -> Self {
        Self {
            knowledge,
            default_k: default_k.clamp(1, MAX_K),
        }
    }

    pub fn spec() -> ActionSpec {
        ActionSpec::new(
            NAME,
            "Searches the knowledge base for passages relevant to a query about brokers, trading or the website's content.",
        )
        .field(FieldSpec::required("query", FieldType::String).describe("The search query"))
        .field(
            FieldSpec::optional("k", FieldType::Integer)
                .describe("How many passages to return (default 5)"),
        )
    }
}

#[async_trait]
impl ActionHandler for KnowledgeSearchAction {
    async fn call(&self, args: ValidatedArgs) -> Result<serde_json::Value, ActionError> {
        let query = args.str("query").unwrap_or_default().trim();
        let k = args
            .integer("k")
            .map(|k| k.clamp(1, MAX_K as i64) as usize)
            .unwrap_or(self.default_k);

        debug!(kb = self.knowledge.name(), k, "Searching knowledge base");

        let passages = self
            .knowledge
            .search(query, k)
            .await
            .map_err(|e| ActionError::failure(NAME, e.to_string()))?;

        Ok(serde_json::Value::String(format_context(&passages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagebot_core::error::KnowledgeError;
    use sagebot_core::knowledge::{NO_RELEVANT_DOCUMENTS, Passage};
    use std::sync::Mutex;

    struct RecordingKb {
        passages: Vec<Passage>,
        asked_k: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl KnowledgeBase for RecordingKb {
        fn name(&self) -> &str {
            "recording"
        }

        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>, KnowledgeError> {
            self.asked_k.lock().unwrap().push(k);
            Ok(self.passages.iter().take(k).cloned().collect())
        }
    }

    struct BrokenKb;

    #[async_trait]
    impl KnowledgeBase for BrokenKb {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, KnowledgeError> {
            Err(KnowledgeError::EmbeddingFailed("quota".into()))
        }
    }

    fn args(raw: serde_json::Value) -> ValidatedArgs {
        KnowledgeSearchAction::spec()
            .validate(raw.as_object().unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn empty_result_is_sentinel_every_time() {
        let kb = Arc::new(RecordingKb {
            passages: vec![],
            asked_k: Mutex::new(vec![]),
        });
        let action = KnowledgeSearchAction::new(kb, 5);

        for _ in 0..2 {
            let out = action
                .call(args(serde_json::json!({"query": "spreads"})))
                .await
                .unwrap();
            assert_eq!(out, serde_json::Value::String(NO_RELEVANT_DOCUMENTS.into()));
        }
    }

    #[tokio::test]
    async fn formats_passages_and_caps_k() {
        let kb = Arc::new(RecordingKb {
            passages: vec![Passage::new("Leverage multiplies exposure.", 0.9)],
            asked_k: Mutex::new(vec![]),
        });
        let action = KnowledgeSearchAction::new(kb.clone(), 5);

        let out = action
            .call(args(serde_json::json!({"query": "leverage", "k": 500})))
            .await
            .unwrap();
        assert!(out.as_str().unwrap().starts_with("[1]\nLeverage"));

        action
            .call(args(serde_json::json!({"query": "leverage"})))
            .await
            .unwrap();
        assert_eq!(*kb.asked_k.lock().unwrap(), vec![MAX_K, 5]);
    }

    #[tokio::test]
    async fn retrieval_error_is_handler_failure() {
        let action = KnowledgeSearchAction::new(Arc::new(BrokenKb), 5);
        let err = action
            .call(args(serde_json::json!({"query": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::HandlerFailure { .. }));
    }
}
