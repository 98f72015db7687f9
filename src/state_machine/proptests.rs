//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::llm::ProviderError;
use crate::message::{Message, Role, ToolRequest};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_request() -> impl Strategy<Value = ToolRequest> {
    ("[a-z]{8}", "[a-z_]{1,12}").prop_map(|(id, name)| ToolRequest::new(id, name, json!({})))
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Terminal),
        Just(Step::AwaitModelResponse),
        proptest::collection::vec(arb_request(), 1..5).prop_map(|pending| Step::AwaitToolResults { pending }),
    ]
}

fn arb_non_user_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z ]{0,20}".prop_map(|text| Event::ModelReplied {
            message: Message::model(text, vec![])
        }),
        proptest::collection::vec(arb_request(), 1..3).prop_map(|requests| Event::ModelReplied {
            message: Message::model("", requests)
        }),
        Just(Event::ModelFailed {
            error: ProviderError::server("boom")
        }),
        (1u32..50).prop_map(|limit| Event::StepLimitReached { limit }),
        "[a-z]{8}".prop_map(|id| Event::ToolFinished {
            message: Message::tool_result(id, "out")
        }),
    ]
}

/// Tool request counts per model call; the script always ends with a final
/// answer.
fn arb_script() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(1usize..4, 0..5)
}

// ============================================================================
// Simulation
// ============================================================================

/// Apply a transition and commit its messages to `history` like the
/// runtime would.
fn apply(step: &Step, event: Event, history: &mut Vec<Message>) -> TransitionResult {
    let result = transition(step, event).expect("transition should succeed");
    for effect in &result.effects {
        if let Effect::Commit { message, .. } = effect {
            history.push(message.clone());
        }
    }
    result
}

fn model_reply(round: usize, tools: usize) -> Message {
    let requests = (0..tools)
        .map(|i| ToolRequest::new(format!("r{round}-{i}"), "clock", json!({})))
        .collect();
    Message::model(format!("round {round}"), requests)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // A scripted run always ends Terminal, and the committed history replays
    // to the same step the transitions produced at every point.
    #[test]
    fn prop_scripted_run_matches_recovery(script in arb_script(), failures in proptest::collection::vec(any::<bool>(), 16)) {
        let mut history = Vec::new();
        let mut step = Step::Terminal;
        let mut events = std::collections::VecDeque::from([Event::UserMessage { message: Message::user("go") }]);
        let mut round = 0;
        let mut emitted = 0;
        let mut failure_bits = failures.iter().cycle();

        while let Some(event) = events.pop_front() {
            let result = apply(&step, event, &mut history);
            step = result.new_step;
            prop_assert_eq!(&resume(&history).step, &step);

            for effect in result.effects {
                match effect {
                    Effect::Commit { emit: true, .. } => emitted += 1,
                    Effect::Commit { .. } => {}
                    Effect::RequestModel => {
                        let tools = script.get(round).copied().unwrap_or(0);
                        events.push_back(Event::ModelReplied { message: model_reply(round, tools) });
                        round += 1;
                    }
                    Effect::ExecuteTools { requests } => {
                        for request in requests {
                            let message = if *failure_bits.next().unwrap_or(&false) {
                                Message::tool_failure(request.id, json!({"error": {"kind": "execution_failure"}}))
                            } else {
                                Message::tool_result(request.id, "ok")
                            };
                            events.push_back(Event::ToolFinished { message });
                        }
                    }
                    Effect::Fail { failure } => prop_assert!(false, "unexpected failure {:?}", failure),
                }
            }
        }

        prop_assert_eq!(step, Step::Terminal);
        let tool_calls: usize = script.iter().sum();
        // one model message per round plus the final answer, one tool message per request
        prop_assert_eq!(emitted, script.len() + 1 + tool_calls);
        prop_assert_eq!(history.len(), emitted + 1);
        prop_assert_eq!(history[0].role, Role::User);

        // every tool message directly follows its request, in request order
        let mut expected = Vec::new();
        for message in &history {
            match message.role {
                Role::Model => {
                    prop_assert!(expected.is_empty());
                    expected = message.tool_requests.iter().map(|r| r.id.clone()).rev().collect();
                }
                Role::Tool => prop_assert_eq!(message.answers.clone(), expected.pop()),
                Role::User => {}
            }
        }
        prop_assert!(expected.is_empty());
    }

    // From any step a user message leads to a model request, after closing
    // out whatever was pending.
    #[test]
    fn prop_user_message_always_accepted(step in arb_step(), text in "[a-zA-Z ]{1,30}") {
        let pending = match &step {
            Step::AwaitToolResults { pending } => pending.len(),
            _ => 0,
        };
        let result = transition(&step, Event::UserMessage { message: Message::user(text.clone()) }).unwrap();

        prop_assert_eq!(&result.new_step, &Step::AwaitModelResponse);
        prop_assert!(matches!(result.effects.last(), Some(Effect::RequestModel)));

        let mut emitted = 0;
        let mut quiet = Vec::new();
        for effect in &result.effects {
            if let Effect::Commit { message, emit } = effect {
                if *emit {
                    prop_assert_eq!(message.role, Role::Tool);
                    prop_assert!(message.is_error);
                    emitted += 1;
                } else {
                    quiet.push(message);
                }
            }
        }
        prop_assert_eq!(emitted, pending);
        prop_assert_eq!(quiet.len(), 1);
        prop_assert_eq!(&quiet[0].content, &text);
    }

    // Disconnect from any step stops without committing anything
    #[test]
    fn prop_consumer_gone_has_no_effects(step in arb_step()) {
        let result = transition(&step, Event::ConsumerGone).unwrap();
        prop_assert_eq!(result.new_step, Step::Terminal);
        prop_assert!(result.effects.is_empty());
    }

    // Only a user message can wake a terminal conversation
    #[test]
    fn prop_terminal_rejects_other_events(event in arb_non_user_event()) {
        prop_assert!(transition(&Step::Terminal, event).is_err());
    }

    // A result that doesn't answer the oldest pending request is rejected
    #[test]
    fn prop_out_of_order_results_rejected(
        pending in proptest::collection::vec(arb_request(), 2..5),
        pick in 1usize..5,
    ) {
        let pick = pick % pending.len();
        prop_assume!(pending[pick].id != pending[0].id);
        let message = Message::tool_result(pending[pick].id.clone(), "early");
        let result = transition(&Step::AwaitToolResults { pending }, Event::ToolFinished { message });
        let is_out_of_order = matches!(result, Err(TransitionError::OutOfOrderResult { .. }));
        prop_assert!(is_out_of_order);
    }
}
