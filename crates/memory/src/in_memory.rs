//! In-memory stores — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use sagebot_core::error::StoreError;
use sagebot_core::store::{MessageStore, Session, SessionStore, StoredMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps messages and sessions in process memory.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<(usize, &StoredMessage)> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.session_id == session_id)
            .collect();

        // Newest first; insertion order breaks timestamp ties
        matching.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(&a.0)));
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn create(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(session.session_id.clone())
            .or_insert(session);
        Ok(())
    }
}
