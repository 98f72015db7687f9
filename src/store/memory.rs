//! In-memory conversation store

use super::{ConversationStore, StoreError};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type History = Arc<Mutex<Vec<Message>>>;

/// Histories keyed by conversation id, each behind its own lock so appends
/// to different conversations never contend.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, History>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn history(&self, conversation_id: &str) -> Result<History, StoreError> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().unwrap_or_else(PoisonError::into_inner);
        if conversations.contains_key(conversation_id) {
            return Ok(false);
        }
        conversations.insert(conversation_id.to_string(), History::default());
        Ok(true)
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<usize, StoreError> {
        let history = self.history(conversation_id)?;
        let mut messages = history.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push(message.clone());
        Ok(messages.len())
    }

    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let history = self.history(conversation_id)?;
        let messages = history.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(messages.clone())
    }
}
