//! Conversation persistence — message log and visitor sessions.
//!
//! The orchestration core never touches these directly; the gateway loads
//! history before a turn and persists both sides of the exchange after it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoredRole {
    User,
    Bot,
    System,
}

impl StoredRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Bot => "BOT",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "BOT" => Some(Self::Bot),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// One persisted message of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub session_id: String,
    pub role: StoredRole,
    pub text: String,
    /// Set when a bot answer was cut short by a failed turn.
    #[serde(default)]
    pub partial: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, StoredRole::User, text)
    }

    pub fn bot(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, StoredRole::Bot, text)
    }

    pub fn new(session_id: impl Into<String>, role: StoredRole, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            text: text.into(),
            partial: false,
            created_at: Utc::now(),
        }
    }

    pub fn mark_partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// A prior exchange line handed to the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: StoredRole,
    pub text: String,
}

impl HistoryEntry {
    /// Chronological history from a newest-first message listing.
    /// System messages are not part of the conversation and are skipped.
    pub fn from_recent(newest_first: &[StoredMessage]) -> Vec<Self> {
        newest_first
            .iter()
            .rev()
            .filter(|m| m.role != StoredRole::System)
            .map(|m| Self {
                role: m.role,
                text: m.text.clone(),
            })
            .collect()
    }
}

/// A visitor session, keyed by the client-chosen device id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    pub device: String,
    pub language: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub start_page: Option<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// The latest `limit` messages of a session, newest first.
    async fn recent(&self, session_id: &str, limit: usize)
    -> Result<Vec<StoredMessage>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    async fn create(&self, session: Session) -> Result<(), StoreError>;
}
