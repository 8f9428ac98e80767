//! Persistence and retrieval implementations for sagebot.
//!
//! - Message and session stores (`InMemoryStore`, `SqliteStore`)
//! - The knowledge base behind retrieval (`VectorKnowledgeBase`, `StaticKnowledgeBase`)

pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use vector::{
    IndexedChunk, StaticKnowledgeBase, VectorKnowledgeBase, cosine_similarity, vector_search,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
