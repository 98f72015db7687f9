//! Effects produced by state transitions

use crate::llm::ProviderError;
use crate::message::{Message, ToolRequest};

/// Effects to be executed after a transition, in order
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append to the conversation store; when `emit` is set, also push the
    /// message to the run's consumer once the append succeeded
    Commit { message: Message, emit: bool },

    /// Call the model with the full committed history
    RequestModel,

    /// Start executing tool requests. Results come back as
    /// `Event::ToolFinished`, one per request, in request order.
    ExecuteTools { requests: Vec<ToolRequest> },

    /// End the run with a terminal error event
    Fail { failure: Failure },
}

/// Terminal failure of a run
#[derive(Debug, Clone)]
pub enum Failure {
    Provider(ProviderError),
    StepLimit { limit: u32 },
}

impl Effect {
    /// Commit without streaming (the caller already knows its own text)
    pub fn commit_quiet(message: Message) -> Self {
        Effect::Commit {
            message,
            emit: false,
        }
    }

    pub fn commit_and_emit(message: Message) -> Self {
        Effect::Commit {
            message,
            emit: true,
        }
    }

    pub fn fail(failure: Failure) -> Self {
        Effect::Fail { failure }
    }
}
