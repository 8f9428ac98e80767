//! Vector similarity search and the knowledge bases built on it.
//!
//! The knowledge index is a JSON array of pre-embedded chunks
//! (`{text, embedding, source?}`) produced offline. Queries are embedded
//! through the provider and ranked by cosine similarity.

use async_trait::async_trait;
use sagebot_core::Provider;
use sagebot_core::error::KnowledgeError;
use sagebot_core::knowledge::{KnowledgeBase, Passage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// One pre-embedded chunk of the knowledge index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Rank chunks by cosine similarity to a query embedding.
///
/// Returns passages sorted by descending similarity, with `score` set to the
/// cosine similarity value. Only chunks that meet the minimum score are kept.
pub fn vector_search(
    chunks: &[IndexedChunk],
    query_embedding: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<Passage> {
    let mut scored: Vec<Passage> = chunks
        .iter()
        .filter_map(|chunk| {
            let sim = cosine_similarity(&chunk.embedding, query_embedding);
            (sim >= min_score).then(|| Passage {
                text: chunk.text.clone(),
                score: sim,
                source: chunk.source.clone(),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Knowledge base over an in-memory vector index.
pub struct VectorKnowledgeBase {
    provider: Arc<dyn Provider>,
    embedding_model: String,
    chunks: Vec<IndexedChunk>,
    min_score: f32,
}

impl VectorKnowledgeBase {
    pub fn new(
        provider: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
        chunks: Vec<IndexedChunk>,
    ) -> Self {
        Self {
            provider,
            embedding_model: embedding_model.into(),
            chunks,
            min_score: 0.0,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Load the index from a JSON file.
    pub fn load(
        provider: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
        path: &Path,
    ) -> Result<Self, KnowledgeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("{}: {e}", path.display()))
        })?;
        let chunks: Vec<IndexedChunk> = serde_json::from_str(&content).map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("{}: {e}", path.display()))
        })?;

        info!(chunks = chunks.len(), path = %path.display(), "Knowledge index loaded");
        Ok(Self::new(provider, embedding_model, chunks))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for VectorKnowledgeBase {
    fn name(&self) -> &str {
        "vector"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, KnowledgeError> {
        if self.chunks.is_empty() || query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embeddings = self
            .provider
            .embed(&self.embedding_model, &[query.to_string()])
            .await
            .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::EmbeddingFailed("no embedding returned".into()))?;

        let passages = vector_search(&self.chunks, &query_embedding, k, self.min_score);
        debug!(k, found = passages.len(), "Knowledge search complete");
        Ok(passages)
    }
}

/// A fixed set of passages, returned best-first regardless of the query.
///
/// Used when no index is configured (empty) and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    passages: Vec<Passage>,
}

impl StaticKnowledgeBase {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>, KnowledgeError> {
        let mut passages = self.passages.clone();
        passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(k);
        Ok(passages)
    }
}
