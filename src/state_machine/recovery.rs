//! Checkpoint recovery
//!
//! The step is never stored. It is derived from committed history whenever a
//! run starts, so a conversation interrupted at any point resumes from the
//! last message that made it into the store.

use super::Step;
use crate::message::{Message, Role};
use std::collections::HashSet;

/// Result of analyzing history for resumption
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeDecision {
    pub step: Step,
    /// Why we picked this step (for logging)
    pub reason: ResumeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    EmptyConversation,
    /// Last message is a model message without requests
    FinalAnswer,
    /// Last message is from the user; the model never answered
    UserAwaitingReply,
    /// Some requests of the latest model message have no tool message yet
    ToolsInterrupted,
    /// Every request was answered but the model was not called again
    ToolsCompleted,
}

impl ResumeDecision {
    fn new(step: Step, reason: ResumeReason) -> Self {
        Self { step, reason }
    }
}

/// Derive the step a conversation rests at from its committed history.
pub fn resume(messages: &[Message]) -> ResumeDecision {
    let Some(last) = messages.last() else {
        return ResumeDecision::new(Step::Terminal, ResumeReason::EmptyConversation);
    };

    match last.role {
        Role::User => ResumeDecision::new(Step::AwaitModelResponse, ResumeReason::UserAwaitingReply),
        Role::Model if last.tool_requests.is_empty() => {
            ResumeDecision::new(Step::Terminal, ResumeReason::FinalAnswer)
        }
        Role::Model => ResumeDecision::new(
            Step::AwaitToolResults {
                pending: last.tool_requests.clone(),
            },
            ResumeReason::ToolsInterrupted,
        ),
        Role::Tool => resume_after_tool(messages),
    }
}

fn resume_after_tool(messages: &[Message]) -> ResumeDecision {
    let Some(model_idx) = messages.iter().rposition(|m| m.role == Role::Model) else {
        // Orphan tool output; let the model look at it
        return ResumeDecision::new(Step::AwaitModelResponse, ResumeReason::ToolsCompleted);
    };

    let answered: HashSet<&str> = messages[model_idx + 1..]
        .iter()
        .filter_map(|m| m.answers.as_deref())
        .collect();
    let pending: Vec<_> = messages[model_idx]
        .tool_requests
        .iter()
        .filter(|r| !answered.contains(r.id.as_str()))
        .cloned()
        .collect();

    if pending.is_empty() {
        ResumeDecision::new(Step::AwaitModelResponse, ResumeReason::ToolsCompleted)
    } else {
        ResumeDecision::new(Step::AwaitToolResults { pending }, ResumeReason::ToolsInterrupted)
    }
}
