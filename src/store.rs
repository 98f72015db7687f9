//! Conversation store
//!
//! Append-only message history per conversation id. Ordering follows commit
//! order; nothing is ever rewritten or removed.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::message::Message;
use crate::state_machine::{resume, ResumeReason, Step};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt stored message {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Committed history plus the step derived from it
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub messages: Vec<Message>,
    pub step: Step,
    pub reason: ResumeReason,
}

impl Checkpoint {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let decision = resume(&messages);
        Self {
            messages,
            step: decision.step,
            reason: decision.reason,
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Ensure the conversation exists. Returns true if it was just created.
    async fn get_or_create(&self, conversation_id: &str) -> Result<bool, StoreError>;

    /// Append one message; returns the new history length. Appends to one
    /// conversation are serialized and never interleave partially.
    async fn append(&self, conversation_id: &str, message: &Message) -> Result<usize, StoreError>;

    /// Messages in commit order
    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn checkpoint(&self, conversation_id: &str) -> Result<Checkpoint, StoreError> {
        Ok(Checkpoint::from_messages(self.snapshot(conversation_id).await?))
    }
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn get_or_create(&self, conversation_id: &str) -> Result<bool, StoreError> {
        (**self).get_or_create(conversation_id).await
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<usize, StoreError> {
        (**self).append(conversation_id, message).await
    }

    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        (**self).snapshot(conversation_id).await
    }

    async fn checkpoint(&self, conversation_id: &str) -> Result<Checkpoint, StoreError> {
        (**self).checkpoint(conversation_id).await
    }
}
