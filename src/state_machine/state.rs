//! Orchestration step

use crate::message::ToolRequest;
use serde::Serialize;

/// Next action for a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// History ends with a user or tool message; the model speaks next
    AwaitModelResponse,

    /// The last model message has unanswered tool requests
    AwaitToolResults {
        /// Requests still waiting for a result, in the order the model listed them
        pending: Vec<ToolRequest>,
    },

    /// The model gave a final answer (or the run stopped). Also the resting
    /// state of a conversation between runs.
    #[default]
    Terminal,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Terminal)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::AwaitModelResponse => "await_model_response",
            Step::AwaitToolResults { .. } => "await_tool_results",
            Step::Terminal => "terminal",
        }
    }
}
