//! Tool registry and execution
//!
//! The registry is built once at startup and validated then. Execution never
//! propagates a tool's failure: argument problems, errors and panics all come
//! back as a [`ToolFailure`] that the orchestrator hands to the model.

mod clock;
mod schema;

pub use clock::ClockTool;
pub use schema::{ArgSchema, ArgType, ParamSpec};

use crate::llm::ToolDefinition;
use crate::message::ToolRequest;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const MAX_TOOL_NAME_LEN: usize = 64;

/// Error returned by a tool's own logic
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a tool request produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolFailure {
    #[error("Tool '{name}' not found")]
    NotFound { name: String },
    #[error("Invalid arguments for '{name}': {reason}")]
    ArgumentInvalid { name: String, reason: String },
    #[error("Tool '{name}' failed: {message}")]
    ExecutionFailure { name: String, message: String },
    #[error("Tool '{name}' was cancelled")]
    Cancelled { name: String },
}

impl ToolFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolFailure::NotFound { .. } => "tool_not_found",
            ToolFailure::ArgumentInvalid { .. } => "tool_argument_invalid",
            ToolFailure::ExecutionFailure { .. } => "execution_failure",
            ToolFailure::Cancelled { .. } => "cancelled",
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolFailure::NotFound { name }
            | ToolFailure::ArgumentInvalid { name, .. }
            | ToolFailure::ExecutionFailure { name, .. }
            | ToolFailure::Cancelled { name } => name,
        }
    }

    /// Structured description stored as the tool message content
    pub fn to_content(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind(),
                "tool": self.tool_name(),
                "message": self.to_string(),
            }
        })
    }
}

/// Problems found while building the registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool name {0:?} is invalid (1-64 chars of [A-Za-z0-9_-])")]
    InvalidName(String),
    #[error("Tool {0:?} registered twice")]
    DuplicateTool(String),
}

/// Per-invocation context
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal for long-running operations
    pub cancel: CancellationToken,

    /// The conversation this tool is executing within
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, conversation_id: impl Into<String>) -> Self {
        Self {
            cancel,
            conversation_id: conversation_id.into(),
        }
    }
}

/// A callable tool.
///
/// Long-running tools should watch `ctx.cancel`; the registry also stops
/// polling a tool once its token fires.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// Declared parameters. Arguments are validated against this before `run`.
    fn parameters(&self) -> ArgSchema;

    async fn run(&self, arguments: Map<String, Value>, ctx: ToolContext) -> Result<String, ToolError>;
}

/// Seam between the orchestrator and whatever executes tool requests
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Resolve and execute one request. Never panics, never propagates.
    async fn invoke(&self, request: &ToolRequest, ctx: ToolContext) -> Result<String, ToolFailure>;

    /// Get tool definitions for the model
    fn definitions(&self) -> Vec<ToolDefinition>;
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn invoke(&self, request: &ToolRequest, ctx: ToolContext) -> Result<String, ToolFailure> {
        (**self).invoke(request, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

/// Collection of tools available to conversations
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Registry with the built-in tools
    pub fn standard() -> Result<Self, RegistryError> {
        Self::builder().register(ClockTool).build()
    }

    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolFailure> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx]))
            .ok_or_else(|| ToolFailure::NotFound {
                name: name.to_string(),
            })
    }

    /// Validate arguments and run the tool, converting every failure mode
    /// (including panics) into a [`ToolFailure`].
    pub async fn execute(
        &self,
        tool: &dyn Tool,
        arguments: &Value,
        ctx: ToolContext,
    ) -> Result<String, ToolFailure> {
        let name = tool.name().to_string();
        let args = tool
            .parameters()
            .validate(arguments)
            .map_err(|reason| ToolFailure::ArgumentInvalid {
                name: name.clone(),
                reason,
            })?;

        let cancel = ctx.cancel.clone();
        if cancel.is_cancelled() {
            return Err(ToolFailure::Cancelled { name });
        }

        let run = AssertUnwindSafe(tool.run(args, ctx)).catch_unwind();
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::info!(tool = %name, "Tool execution cancelled");
                Err(ToolFailure::Cancelled { name })
            }

            outcome = run => match outcome {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ToolFailure::ExecutionFailure { name, message: e.to_string() }),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(tool = %name, panic = %message, "Tool panicked");
                    Err(ToolFailure::ExecutionFailure { name, message: format!("panicked: {message}") })
                }
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn invoke(&self, request: &ToolRequest, ctx: ToolContext) -> Result<String, ToolFailure> {
        let tool = self.resolve(&request.name)?;
        self.execute(tool.as_ref(), &request.arguments, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.parameters().to_json_schema(),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    #[must_use]
    pub fn register(self, tool: impl Tool + 'static) -> Self {
        self.register_arc(Arc::new(tool))
    }

    #[must_use]
    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut by_name = HashMap::with_capacity(self.tools.len());
        for (idx, tool) in self.tools.iter().enumerate() {
            let name = tool.name();
            if !is_valid_tool_name(name) {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
            if by_name.insert(name.to_string(), idx).is_some() {
                return Err(RegistryError::DuplicateTool(name.to_string()));
            }
        }
        Ok(ToolRegistry {
            tools: self.tools,
            by_name,
        })
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
