//! Knowledge base — the retrieval collaborator.
//!
//! The core only consumes passages; computing similarity is the
//! implementation's job. Formatting passages into prompt context lives here
//! so every caller renders them the same way.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

/// Returned in place of context whenever retrieval finds nothing.
/// It is a valid result, not a failure.
pub const NO_RELEVANT_DOCUMENTS: &str = "No relevant documents found in the knowledge base. \
Try to answer the user query based on common knowledge.";

/// A retrieved text chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Passage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            source: None,
        }
    }
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `k` passages most similar to `query`, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, KnowledgeError>;
}

/// Render passages as prompt context.
///
/// Blank passages are dropped; when nothing remains the result is
/// [`NO_RELEVANT_DOCUMENTS`], never an empty string.
pub fn format_context(passages: &[Passage]) -> String {
    let blocks: Vec<String> = passages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .enumerate()
        .map(|(i, p)| match &p.source {
            Some(source) => format!("[{}] (source: {source})\n{}", i + 1, p.text.trim()),
            None => format!("[{}]\n{}", i + 1, p.text.trim()),
        })
        .collect();

    if blocks.is_empty() {
        NO_RELEVANT_DOCUMENTS.to_string()
    } else {
        blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_passages_yield_sentinel() {
        assert_eq!(format_context(&[]), NO_RELEVANT_DOCUMENTS);
        assert_eq!(
            format_context(&[Passage::new("   ", 0.9)]),
            NO_RELEVANT_DOCUMENTS
        );
    }

    #[test]
    fn passages_are_numbered_in_order() {
        let mut second = Passage::new("Alpari accepts bank transfers.", 0.7);
        second.source = Some("blog/alpari-deposit".into());
        let ctx = format_context(&[Passage::new("Spreads vary by account.", 0.9), second]);

        assert!(ctx.starts_with("[1]\nSpreads vary by account."));
        assert!(ctx.contains("[2] (source: blog/alpari-deposit)\nAlpari accepts bank transfers."));
        assert_ne!(ctx, NO_RELEVANT_DOCUMENTS);
    }

    #[test]
    fn formatting_is_stable() {
        let passages = vec![Passage::new("a", 0.5)];
        assert_eq!(format_context(&passages), format_context(&passages));
    }
}
