//! Runtime for executing conversation runs
//!
//! A run takes one submitted user message through the state machine until the
//! conversation is terminal, the run fails, or its consumer goes away.

mod emitter;
mod executor;

#[cfg(test)]
pub mod testing;

pub use emitter::{channel, ConsumerGone, Emitter, MessageStream, RunItem};
pub use executor::{Orchestrator, RunLimits, RunOutcome};

use crate::llm::ProviderError;
use crate::state_machine::{Failure, TransitionError};
use crate::store::StoreError;
use thiserror::Error;

/// Terminal error delivered as the last item of a run's stream
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(ProviderError),
    #[error("Model provider error ({}): {}", .0.kind.as_str(), .0.message)]
    Provider(ProviderError),
    #[error("Stopped after {limit} model calls without a final answer")]
    StepLimitExceeded { limit: u32 },
    #[error("Conversation store failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<Failure> for RunError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Provider(error) if error.is_unavailable() => RunError::ProviderUnavailable(error),
            Failure::Provider(error) => RunError::Provider(error),
            Failure::StepLimit { limit } => RunError::StepLimitExceeded { limit },
        }
    }
}
