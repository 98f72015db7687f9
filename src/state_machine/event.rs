//! Events that drive the step loop

use crate::llm::ProviderError;
use crate::message::Message;

#[derive(Debug, Clone)]
pub enum Event {
    /// Caller submitted text; `message` is the wrapped user message
    UserMessage { message: Message },

    // Model events
    ModelReplied { message: Message },
    ModelFailed { error: ProviderError },
    StepLimitReached { limit: u32 },

    /// A tool-role message for the oldest pending request
    ToolFinished { message: Message },

    /// The stream consumer disconnected or the session was closed
    ConsumerGone,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserMessage { .. } => "user_message",
            Event::ModelReplied { .. } => "model_replied",
            Event::ModelFailed { .. } => "model_failed",
            Event::StepLimitReached { .. } => "step_limit_reached",
            Event::ToolFinished { .. } => "tool_finished",
            Event::ConsumerGone => "consumer_gone",
        }
    }
}
