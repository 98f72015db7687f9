//! Pure state transition function

use super::{Effect, Event, Failure, Step};
use crate::message::{Message, Role, ToolRequest};
use crate::tools::ToolFailure;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_step: Step,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(step: Step) -> Self {
        Self {
            new_step: step,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Tool result out of order: expected answer to '{expected}', got {got:?}")]
    OutOfOrderResult {
        expected: String,
        got: Option<String>,
    },
}

/// Pure transition function
///
/// Given the same step and event it always yields the same next step and
/// effects, and performs no I/O.
pub fn transition(step: &Step, event: Event) -> Result<TransitionResult, TransitionError> {
    match (step, event) {
        (_, Event::UserMessage { message }) if message.role != Role::User => Err(
            TransitionError::InvalidTransition(format!("user event carries a {} message", message.role.as_str())),
        ),

        // A fresh or finished conversation, or one interrupted before the
        // model answered. Either way the new text just extends history.
        (Step::Terminal | Step::AwaitModelResponse, Event::UserMessage { message }) => {
            Ok(TransitionResult::new(Step::AwaitModelResponse)
                .with_effect(Effect::commit_quiet(message))
                .with_effect(Effect::RequestModel))
        }

        // Interrupted mid-tools: answer every open request with a cancelled
        // failure so the history stays well formed for the provider.
        (Step::AwaitToolResults { pending }, Event::UserMessage { message }) => {
            Ok(TransitionResult::new(Step::AwaitModelResponse)
                .with_effects(pending.iter().map(|r| Effect::commit_and_emit(abandoned_result(r))))
                .with_effect(Effect::commit_quiet(message))
                .with_effect(Effect::RequestModel))
        }

        (Step::AwaitModelResponse, Event::ModelReplied { message }) => {
            if message.role != Role::Model {
                return Err(TransitionError::InvalidTransition(format!(
                    "model reply carries a {} message",
                    message.role.as_str()
                )));
            }
            if message.tool_requests.is_empty() {
                return Ok(TransitionResult::new(Step::Terminal).with_effect(Effect::commit_and_emit(message)));
            }
            let requests = message.tool_requests.clone();
            Ok(TransitionResult::new(Step::AwaitToolResults {
                pending: requests.clone(),
            })
            .with_effect(Effect::commit_and_emit(message))
            .with_effect(Effect::ExecuteTools { requests }))
        }

        (Step::AwaitModelResponse, Event::ModelFailed { error }) => {
            Ok(TransitionResult::new(Step::Terminal).with_effect(Effect::fail(Failure::Provider(error))))
        }

        (Step::AwaitModelResponse, Event::StepLimitReached { limit }) => {
            Ok(TransitionResult::new(Step::Terminal).with_effect(Effect::fail(Failure::StepLimit { limit })))
        }

        (Step::AwaitToolResults { pending }, Event::ToolFinished { message }) => {
            let Some((next, rest)) = pending.split_first() else {
                return Err(TransitionError::InvalidTransition(
                    "tool result with no pending requests".to_string(),
                ));
            };
            if message.role != Role::Tool || message.answers.as_deref() != Some(next.id.as_str()) {
                return Err(TransitionError::OutOfOrderResult {
                    expected: next.id.clone(),
                    got: message.answers,
                });
            }
            if rest.is_empty() {
                Ok(TransitionResult::new(Step::AwaitModelResponse)
                    .with_effect(Effect::commit_and_emit(message))
                    .with_effect(Effect::RequestModel))
            } else {
                Ok(TransitionResult::new(Step::AwaitToolResults {
                    pending: rest.to_vec(),
                })
                .with_effect(Effect::commit_and_emit(message)))
            }
        }

        // Nothing more gets committed; the checkpoint stays where it is
        (_, Event::ConsumerGone) => Ok(TransitionResult::new(Step::Terminal)),

        (step, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {}",
            step.name(),
            event.name()
        ))),
    }
}

fn abandoned_result(request: &ToolRequest) -> Message {
    let failure = ToolFailure::Cancelled {
        name: request.name.clone(),
    };
    Message::tool_failure(request.id.clone(), failure.to_content())
}
