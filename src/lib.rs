//! Orchestra - tool-using conversation orchestrator
//!
//! Drives a conversation between a user, a language model and a set of tools
//! through an explicit state machine, committing every message to a
//! conversation store before streaming it to the caller.

pub mod config;
pub mod llm;
pub mod message;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod tools;
