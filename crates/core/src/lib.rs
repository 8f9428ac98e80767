//! # sagebot Core
//!
//! Domain types, traits, and error definitions for the sagebot chat backend.
//! This crate performs **no I/O** — it defines the domain model that the
//! provider, memory, tools, agent and gateway crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (LLM, knowledge base, page fetcher, message
//! store) is a trait here. Implementations live in their respective crates,
//! which keeps the orchestration core testable with scripted stand-ins.

pub mod action;
pub mod error;
pub mod knowledge;
pub mod page;
pub mod provider;
pub mod store;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use action::{
    ActionHandler, ActionRegistry, ActionRequest, ActionResult, ActionSpec, ArgValue, FieldSpec,
    FieldType, ValidatedArgs,
};
pub use error::{
    ActionError, Error, ErrorCategory, KnowledgeError, ProviderError, Result, StoreError,
    TurnError,
};
pub use knowledge::{KnowledgeBase, NO_RELEVANT_DOCUMENTS, Passage, format_context};
pub use page::PageFetcher;
pub use provider::{GenerateRequest, Generation, GenerationConfig, Provider, StreamChunk};
pub use store::{HistoryEntry, MessageStore, Session, SessionStore, StoredMessage, StoredRole};
pub use turn::{ActionResponse, ConversationTurn, Prompt};
