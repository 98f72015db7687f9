//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use crate::llm::{ModelProvider, ModelReply, ModelRequest, ProviderError, ToolDefinition};
use crate::message::ToolRequest;
use crate::tools::{ToolContext, ToolExecutor, ToolFailure};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock Model Provider
// ============================================================================

enum Scripted {
    Reply(ModelReply),
    Error(ProviderError),
    /// Never answers; only cancellation gets the run out
    Hang,
}

/// Mock provider that returns queued replies in order
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_reply(&self, reply: ModelReply) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Reply(reply));
        self
    }

    pub fn queue_error(&self, error: ProviderError) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
        self
    }

    pub fn queue_hang(&self) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Hang);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(ProviderError::unavailable("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

struct MockTool {
    delay: Duration,
    outcome: Result<String, String>,
}

/// Mock tool executor with predefined outcomes and delays
pub struct MockToolExecutor {
    tools: HashMap<String, MockTool>,
    /// Request ids in the order tools started
    pub started: Mutex<Vec<String>>,
    /// Request ids in the order tools finished
    pub finished: Mutex<Vec<String>>,
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tool(mut self, name: &str, delay_ms: u64, outcome: Result<&str, &str>) -> Self {
        self.tools.insert(
            name.to_string(),
            MockTool {
                delay: Duration::from_millis(delay_ms),
                outcome: outcome.map(str::to_string).map_err(str::to_string),
            },
        );
        self
    }

    pub fn finished_order(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn invoke(&self, request: &ToolRequest, ctx: ToolContext) -> Result<String, ToolFailure> {
        let Some(tool) = self.tools.get(&request.name) else {
            return Err(ToolFailure::NotFound {
                name: request.name.clone(),
            });
        };
        self.started.lock().unwrap().push(request.id.clone());

        tokio::select! {
            () = ctx.cancel.cancelled() => {
                return Err(ToolFailure::Cancelled { name: request.name.clone() });
            }
            () = tokio::time::sleep(tool.delay) => {}
        }

        self.finished.lock().unwrap().push(request.id.clone());
        tool.outcome.clone().map_err(|message| ToolFailure::ExecutionFailure {
            name: request.name.clone(),
            message,
        })
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("Mock {name}"),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use crate::runtime::{channel, Orchestrator, RunError, RunItem, RunLimits, RunOutcome};
    use crate::store::{ConversationStore, MemoryStore};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    type TestOrchestrator = Orchestrator<MemoryStore, MockProvider, MockToolExecutor>;

    async fn setup(provider: MockProvider, tools: MockToolExecutor, conversations: &[&str]) -> Arc<TestOrchestrator> {
        let store = Arc::new(MemoryStore::new());
        for id in conversations {
            store.get_or_create(id).await.unwrap();
        }
        Arc::new(Orchestrator::new(store, Arc::new(provider), Arc::new(tools)))
    }

    async fn run_to_end(orchestrator: &TestOrchestrator, conv: &str, text: &str) -> (RunOutcome, Vec<RunItem>) {
        let (emitter, stream) = channel(16);
        tokio::join!(
            orchestrator.run(conv, text.to_string(), emitter, CancellationToken::new()),
            stream.collect::<Vec<_>>()
        )
    }

    fn messages(items: Vec<RunItem>) -> Vec<Message> {
        items.into_iter().map(|item| item.expect("unexpected error item")).collect()
    }

    fn request(id: &str, name: &str) -> ToolRequest {
        ToolRequest::new(id, name, json!({}))
    }

    #[tokio::test]
    async fn test_plain_answer_emits_one_message() {
        let provider = MockProvider::new();
        provider.queue_reply(ModelReply::text("Hello!"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let (outcome, items) = run_to_end(&orchestrator, "c1", "hi").await;

        assert_eq!(outcome, RunOutcome::Completed);
        let emitted = messages(items);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].role, Role::Model);
        assert_eq!(emitted[0].content, "Hello!");

        let history = orchestrator.store().snapshot("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].id, emitted[0].id);
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_stop_siblings() {
        let provider = MockProvider::new();
        provider
            .queue_reply(ModelReply::with_tools(
                "",
                vec![request("A", "broken"), request("B", "clock")],
            ))
            .queue_reply(ModelReply::text("It is Monday"));
        let tools = MockToolExecutor::new()
            .with_tool("broken", 0, Err("disk on fire"))
            .with_tool("clock", 0, Ok("Monday 10:00:00"));
        let orchestrator = setup(provider, tools, &["c1"]).await;

        let (outcome, items) = run_to_end(&orchestrator, "c1", "what day is it").await;
        assert_eq!(outcome, RunOutcome::Completed);

        let emitted = messages(items);
        let roles: Vec<_> = emitted.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::Model, Role::Tool, Role::Tool, Role::Model]);

        assert_eq!(emitted[1].answers.as_deref(), Some("A"));
        assert!(emitted[1].is_error);
        let failure: serde_json::Value = serde_json::from_str(&emitted[1].content).unwrap();
        assert_eq!(failure["error"]["kind"], "execution_failure");

        assert_eq!(emitted[2].answers.as_deref(), Some("B"));
        assert!(!emitted[2].is_error);
        assert_eq!(emitted[2].content, "Monday 10:00:00");

        // second model call saw both results
        let requests = orchestrator.provider().requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].tools.len(), 2);
    }

    #[tokio::test]
    async fn test_results_commit_in_request_order() {
        let provider = MockProvider::new();
        provider
            .queue_reply(ModelReply::with_tools("", vec![request("A", "slow"), request("B", "fast")]))
            .queue_reply(ModelReply::text("done"));
        let tools = MockToolExecutor::new()
            .with_tool("slow", 150, Ok("slow result"))
            .with_tool("fast", 0, Ok("fast result"));
        let orchestrator = setup(provider, tools, &["c1"]).await;

        let (outcome, items) = run_to_end(&orchestrator, "c1", "go").await;
        assert_eq!(outcome, RunOutcome::Completed);

        // B finished first but A is committed first
        assert_eq!(orchestrator.tools().finished_order(), ["B", "A"]);
        let answers: Vec<_> = messages(items).into_iter().filter_map(|m| m.answers).collect();
        assert_eq!(answers, ["A", "B"]);

        let history = orchestrator.store().snapshot("c1").await.unwrap();
        let stored: Vec<_> = history.iter().filter_map(|m| m.answers.clone()).collect();
        assert_eq!(stored, ["A", "B"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_failure_message() {
        let provider = MockProvider::new();
        provider
            .queue_reply(ModelReply::with_tools("", vec![request("A", "nonexistent")]))
            .queue_reply(ModelReply::text("sorry"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let (outcome, items) = run_to_end(&orchestrator, "c1", "go").await;
        assert_eq!(outcome, RunOutcome::Completed);
        let emitted = messages(items);
        assert!(emitted[1].is_error);
        assert!(emitted[1].content.contains("tool_not_found"));
    }

    #[tokio::test]
    async fn test_provider_error_ends_stream() {
        let provider = MockProvider::new();
        provider.queue_error(ProviderError::unavailable("connection refused"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let (outcome, items) = run_to_end(&orchestrator, "c1", "hi").await;

        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RunError::ProviderUnavailable(_))));

        // only the user message made it in; no retry
        assert_eq!(orchestrator.store().snapshot("c1").await.unwrap().len(), 1);
        assert_eq!(orchestrator.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_auth_error_is_not_unavailable() {
        let provider = MockProvider::new();
        provider.queue_error(ProviderError::auth("bad key"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let (_, items) = run_to_end(&orchestrator, "c1", "hi").await;
        assert!(matches!(items.last(), Some(Err(RunError::Provider(_)))));
    }

    #[tokio::test]
    async fn test_step_limit_fails_run() {
        let provider = MockProvider::new();
        for i in 0..3 {
            provider.queue_reply(ModelReply::with_tools("", vec![request(&format!("r{i}"), "clock")]));
        }
        let tools = MockToolExecutor::new().with_tool("clock", 0, Ok("now"));
        let store = Arc::new(MemoryStore::new());
        store.get_or_create("c1").await.unwrap();
        let orchestrator = Orchestrator::new(store, Arc::new(provider), Arc::new(tools))
            .with_limits(RunLimits { max_model_calls: 2 });

        let (outcome, mut items) = run_to_end(&orchestrator, "c1", "loop forever").await;

        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(orchestrator.provider().call_count(), 2);
        let last = items.pop().unwrap();
        assert!(matches!(last, Err(RunError::StepLimitExceeded { limit: 2 })));
        assert_eq!(messages(items).len(), 4);
    }

    #[tokio::test]
    async fn test_consumer_drop_stops_run() {
        let provider = MockProvider::new();
        provider.queue_reply(ModelReply::with_tools("", vec![request("A", "slow")]));
        let tools = MockToolExecutor::new().with_tool("slow", 10_000, Ok("never seen"));
        let orchestrator = setup(provider, tools, &["c1"]).await;

        let (emitter, mut stream) = channel(1);
        let runner = Arc::clone(&orchestrator);
        let run = tokio::spawn(async move {
            runner
                .run("c1", "go".to_string(), emitter, CancellationToken::new())
                .await
        });

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.has_tool_requests());
        drop(stream);

        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run should stop promptly")
            .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);

        // user + model; the abandoned tool never commits
        let history = orchestrator.store().snapshot("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(orchestrator.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_model_call() {
        let provider = MockProvider::new();
        provider.queue_hang();
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let (emitter, stream) = channel(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (outcome, items) = tokio::join!(
            orchestrator.run("c1", "hi".to_string(), emitter, cancel),
            stream.collect::<Vec<_>>()
        );
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_conversations_are_isolated() {
        let provider = MockProvider::new();
        provider
            .queue_reply(ModelReply::text("first"))
            .queue_reply(ModelReply::text("second"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["a", "b"]).await;

        let ((out_a, items_a), (out_b, items_b)) = tokio::join!(
            run_to_end(&orchestrator, "a", "hello from a"),
            run_to_end(&orchestrator, "b", "hello from b")
        );
        assert_eq!(out_a, RunOutcome::Completed);
        assert_eq!(out_b, RunOutcome::Completed);
        assert_eq!(items_a.len(), 1);
        assert_eq!(items_b.len(), 1);

        for (conv, text) in [("a", "hello from a"), ("b", "hello from b")] {
            let history = orchestrator.store().snapshot(conv).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].content, text);
        }
    }

    #[tokio::test]
    async fn test_resume_closes_interrupted_tools() {
        let provider = MockProvider::new();
        provider.queue_reply(ModelReply::text("ok, stopping"));
        let orchestrator = setup(provider, MockToolExecutor::new(), &["c1"]).await;

        let store = orchestrator.store();
        store.append("c1", &Message::user("do two things")).await.unwrap();
        store
            .append("c1", &Message::model("", vec![request("a", "clock"), request("b", "clock")]))
            .await
            .unwrap();
        store.append("c1", &Message::tool_result("a", "done")).await.unwrap();

        let (outcome, items) = run_to_end(&orchestrator, "c1", "never mind").await;
        assert_eq!(outcome, RunOutcome::Completed);

        let emitted = messages(items);
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].answers.as_deref(), Some("b"));
        assert!(emitted[0].content.contains("cancelled"));
        assert_eq!(emitted[1].content, "ok, stopping");

        let history = store.snapshot("c1").await.unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::User, Role::Model, Role::Tool, Role::Tool, Role::User, Role::Model]
        );
    }

    #[tokio::test]
    async fn test_unknown_conversation_fails_run() {
        let orchestrator = setup(MockProvider::new(), MockToolExecutor::new(), &[]).await;
        let (outcome, items) = run_to_end(&orchestrator, "missing", "hi").await;

        assert_eq!(outcome, RunOutcome::Failed);
        assert!(matches!(items.as_slice(), [Err(RunError::Store(_))]));
        assert_eq!(orchestrator.provider().call_count(), 0);
    }
}
