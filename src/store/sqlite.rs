//! SQLite-backed conversation store

use super::{ConversationStore, StoreError};
use crate::message::{Message, Role, ToolRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// SQL schema for initialization
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_requests TEXT NOT NULL DEFAULT '[]',
    answers TEXT,
    is_error BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    PRIMARY KEY (conversation_id, position),
    FOREIGN KEY (conversation_id)
        REFERENCES conversations(id) ON DELETE CASCADE
);
";

/// Durable store; survives process restarts so conversations can be resumed
/// by id.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values; converted outside the row closure so decoding errors
/// become `StoreError` instead of `rusqlite::Error`.
struct StoredRow {
    message_id: String,
    role: String,
    content: String,
    tool_requests: String,
    answers: Option<String>,
    is_error: bool,
    created_at: String,
}

impl SqliteStore {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run blocking SQLite work off the async worker threads
    async fn with_conn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *conn)
        })
        .await?
    }
}

fn conversation_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM conversations WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get_or_create(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)",
                params![conversation_id, Utc::now().to_rfc3339()],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<usize, StoreError> {
        let conversation_id = conversation_id.to_string();
        let message = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if !conversation_exists(&tx, &conversation_id)? {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }

            let position: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO messages (conversation_id, position, message_id, role, content, tool_requests, answers, is_error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    conversation_id,
                    position,
                    message.id,
                    message.role.as_str(),
                    message.content,
                    serde_json::to_string(&message.tool_requests)?,
                    message.answers,
                    message.is_error,
                    message.created_at.to_rfc3339(),
                ],
            )?;
            tx.commit()?;

            Ok(usize::try_from(position).unwrap_or(0) + 1)
        })
        .await
    }

    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            if !conversation_exists(conn, &conversation_id)? {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }

            let mut stmt = conn.prepare(
                "SELECT message_id, role, content, tool_requests, answers, is_error, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(StoredRow {
                        message_id: row.get(0)?,
                        role: row.get(1)?,
                        content: row.get(2)?,
                        tool_requests: row.get(3)?,
                        answers: row.get(4)?,
                        is_error: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(decode_row).collect()
        })
        .await
    }
}

fn decode_row(row: StoredRow) -> Result<Message, StoreError> {
    let role = Role::parse(&row.role).ok_or_else(|| StoreError::Corrupt {
        id: row.message_id.clone(),
        reason: format!("unknown role '{}'", row.role),
    })?;
    let tool_requests: Vec<ToolRequest> = serde_json::from_str(&row.tool_requests)?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map_err(|e| StoreError::Corrupt {
            id: row.message_id.clone(),
            reason: format!("bad timestamp: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(Message {
        id: row.message_id,
        role,
        content: row.content,
        tool_requests,
        answers: row.answers,
        is_error: row.is_error,
        created_at,
    })
}
