//! Conversation messages
//!
//! Messages are immutable once built. Only the orchestrator creates them, by
//! wrapping submitted user text, a model reply or a tool outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    /// Raw arguments as sent by the model. Usually an object; anything else
    /// is rejected at validation time.
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
    /// Request id this tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<String>,
    /// Tool message carries a structured failure instead of a result
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn build(role: Role, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_requests: Vec::new(),
            answers: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::build(Role::User, text.into())
    }

    pub fn model(content: impl Into<String>, tool_requests: Vec<ToolRequest>) -> Self {
        let mut message = Self::build(Role::Model, content.into());
        message.tool_requests = tool_requests;
        message
    }

    pub fn tool_result(request_id: impl Into<String>, output: impl Into<String>) -> Self {
        let mut message = Self::build(Role::Tool, output.into());
        message.answers = Some(request_id.into());
        message
    }

    pub fn tool_failure(request_id: impl Into<String>, failure: Value) -> Self {
        let mut message = Self::build(Role::Tool, failure.to_string());
        message.answers = Some(request_id.into());
        message.is_error = true;
        message
    }

    pub fn has_tool_requests(&self) -> bool {
        self.role == Role::Model && !self.tool_requests.is_empty()
    }
}
