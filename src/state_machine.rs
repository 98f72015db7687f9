//! Orchestration state machine
//!
//! Pure transitions over a tagged union of steps. The runtime executes the
//! effects a transition produces and feeds the resulting events back in.

mod effect;
mod event;
mod recovery;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Failure};
pub use event::Event;
pub use recovery::{resume, ResumeDecision, ResumeReason};
pub use state::Step;
pub use transition::{transition, TransitionError, TransitionResult};
