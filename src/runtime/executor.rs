//! Orchestrator: drives one run through the state machine

use super::{Emitter, RunError};
use crate::llm::{ModelProvider, ModelReply, ModelRequest};
use crate::message::{Message, ToolRequest};
use crate::state_machine::{transition, Effect, Event, Step};
use crate::store::ConversationStore;
use crate::tools::{ToolContext, ToolExecutor, ToolFailure};
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_MAX_MODEL_CALLS: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Model calls allowed per run before it fails with `StepLimitExceeded`
    pub max_model_calls: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model gave a final answer
    Completed,
    /// A terminal error was produced (and delivered if anyone was listening)
    Failed,
    /// The consumer went away or the session was closed
    Cancelled,
}

/// Generic orchestrator that can work with any store, provider and tool
/// implementations. Holds no per-conversation state; every run reloads its
/// checkpoint from the store.
pub struct Orchestrator<S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    store: Arc<S>,
    provider: Arc<P>,
    tools: Arc<T>,
    limits: RunLimits,
}

impl<S, P, T> Orchestrator<S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, tools: Arc<T>) -> Self {
        Self {
            store,
            provider,
            tools,
            limits: RunLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<T> {
        &self.tools
    }

    /// Drive one submitted user message to completion.
    ///
    /// Every committed message except the user's own goes to `emitter` after
    /// it is in the store. Errors never escape: they become the last stream
    /// item and a `Failed` outcome.
    pub async fn run(
        &self,
        conversation_id: &str,
        text: String,
        emitter: Emitter,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut run = Run {
            orchestrator: self,
            conversation_id,
            step: Step::Terminal,
            emitter,
            cancel,
            events: VecDeque::new(),
            in_flight: FuturesOrdered::new(),
            model_calls: 0,
            failed: false,
        };

        let outcome = match run.drive(Message::user(text)).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(conv_id = %conversation_id, error = %error, "Run aborted");
                run.deliver_failure(error).await;
                RunOutcome::Failed
            }
        };

        tracing::info!(
            conv_id = %conversation_id,
            ?outcome,
            model_calls = run.model_calls,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Run finished"
        );
        outcome
    }
}

enum Flow {
    Continue,
    Stop(RunOutcome),
}

/// State of a single run. Only lives as long as `Orchestrator::run`.
struct Run<'a, S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    orchestrator: &'a Orchestrator<S, P, T>,
    conversation_id: &'a str,
    step: Step,
    emitter: Emitter,
    cancel: CancellationToken,
    events: VecDeque<Event>,
    /// Running tools, yielded in request order regardless of finish order
    in_flight: FuturesOrdered<BoxFuture<'static, Message>>,
    model_calls: u32,
    failed: bool,
}

impl<S, P, T> Run<'_, S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    async fn drive(&mut self, user: Message) -> Result<RunOutcome, RunError> {
        let checkpoint = self.orchestrator.store.checkpoint(self.conversation_id).await?;
        tracing::info!(
            conv_id = %self.conversation_id,
            step = checkpoint.step.name(),
            reason = ?checkpoint.reason,
            history = checkpoint.messages.len(),
            "Starting run"
        );
        self.step = checkpoint.step;
        self.events.push_back(Event::UserMessage { message: user });

        loop {
            let event = match self.events.pop_front() {
                Some(event) => event,
                None if !self.in_flight.is_empty() => self.next_tool_result().await,
                None => break,
            };
            if matches!(event, Event::ConsumerGone) {
                return Ok(self.abandon());
            }

            let event_name = event.name();
            let result = transition(&self.step, event)?;
            tracing::debug!(
                conv_id = %self.conversation_id,
                from = self.step.name(),
                to = result.new_step.name(),
                event = event_name,
                "Transition"
            );
            self.step = result.new_step;

            for effect in result.effects {
                if let Flow::Stop(outcome) = self.execute_effect(effect).await? {
                    return Ok(outcome);
                }
            }
        }

        Ok(if self.failed {
            RunOutcome::Failed
        } else {
            RunOutcome::Completed
        })
    }

    async fn next_tool_result(&mut self) -> Event {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Event::ConsumerGone,
            () = self.emitter.closed() => Event::ConsumerGone,
            Some(message) = self.in_flight.next() => Event::ToolFinished { message },
        }
    }

    async fn execute_effect(&mut self, effect: Effect) -> Result<Flow, RunError> {
        match effect {
            Effect::Commit { message, emit } => {
                if self.stopping() {
                    return Ok(Flow::Stop(self.abandon()));
                }
                let position = self.orchestrator.store.append(self.conversation_id, &message).await?;
                tracing::debug!(
                    conv_id = %self.conversation_id,
                    role = message.role.as_str(),
                    position,
                    "Committed message"
                );
                if emit {
                    let delivered = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => false,
                        sent = self.emitter.emit(message) => sent.is_ok(),
                    };
                    if !delivered {
                        return Ok(Flow::Stop(self.abandon()));
                    }
                }
                Ok(Flow::Continue)
            }

            Effect::RequestModel => self.request_model().await,

            Effect::ExecuteTools { requests } => {
                self.start_tools(requests);
                Ok(Flow::Continue)
            }

            Effect::Fail { failure } => {
                let error = RunError::from(failure);
                tracing::warn!(conv_id = %self.conversation_id, error = %error, "Run failed");
                self.failed = true;
                self.deliver_failure(error).await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn request_model(&mut self) -> Result<Flow, RunError> {
        let limit = self.orchestrator.limits.max_model_calls;
        if self.model_calls >= limit {
            self.events.push_back(Event::StepLimitReached { limit });
            return Ok(Flow::Continue);
        }
        self.model_calls += 1;

        let request = ModelRequest {
            messages: self.orchestrator.store.snapshot(self.conversation_id).await?,
            tools: self.orchestrator.tools.definitions(),
        };
        tracing::info!(
            conv_id = %self.conversation_id,
            call = self.model_calls,
            messages = request.messages.len(),
            "Requesting model"
        );

        let reply = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            () = self.emitter.closed() => None,
            reply = self.orchestrator.provider.complete(&request) => Some(reply),
        };

        let event = match reply {
            None => return Ok(Flow::Stop(self.abandon())),
            Some(Ok(reply)) => {
                tracing::debug!(
                    input_tokens = reply.usage.input_tokens,
                    output_tokens = reply.usage.output_tokens,
                    tool_requests = reply.tool_requests.len(),
                    "Model replied"
                );
                Event::ModelReplied {
                    message: wrap_reply(reply),
                }
            }
            Some(Err(error)) => Event::ModelFailed { error },
        };
        self.events.push_back(event);
        Ok(Flow::Continue)
    }

    fn start_tools(&mut self, requests: Vec<ToolRequest>) {
        for request in requests {
            tracing::info!(
                conv_id = %self.conversation_id,
                tool = %request.name,
                id = %request.id,
                "Executing tool"
            );
            let tools = Arc::clone(&self.orchestrator.tools);
            let ctx = ToolContext::new(self.cancel.child_token(), self.conversation_id);
            let id = request.id.clone();
            let name = request.name.clone();

            let handle = tokio::spawn(async move {
                match tools.invoke(&request, ctx).await {
                    Ok(output) => Message::tool_result(request.id, output),
                    Err(failure) => {
                        tracing::warn!(tool = %request.name, id = %request.id, kind = failure.kind(), "{failure}");
                        Message::tool_failure(request.id, failure.to_content())
                    }
                }
            });
            self.in_flight.push_back(
                async move {
                    handle.await.unwrap_or_else(|e| {
                        let failure = ToolFailure::ExecutionFailure {
                            name,
                            message: e.to_string(),
                        };
                        Message::tool_failure(id, failure.to_content())
                    })
                }
                .boxed(),
            );
        }
    }

    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.emitter.is_closed()
    }

    /// Stop without committing anything further. Running tools are signalled
    /// and their results discarded.
    fn abandon(&mut self) -> RunOutcome {
        self.cancel.cancel();
        let dropped = self.in_flight.len();
        self.in_flight = FuturesOrdered::new();
        if let Ok(result) = transition(&self.step, Event::ConsumerGone) {
            self.step = result.new_step;
        }
        tracing::info!(conv_id = %self.conversation_id, dropped_tools = dropped, "Run cancelled");
        RunOutcome::Cancelled
    }

    async fn deliver_failure(&mut self, error: RunError) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            sent = self.emitter.fail(error) => {
                if sent.is_err() {
                    tracing::debug!(conv_id = %self.conversation_id, "Consumer gone before failure delivery");
                }
            }
        }
    }
}

/// Wrap a provider reply as a model message. Request ids must be unique
/// within the message; missing or repeated ones are replaced.
fn wrap_reply(reply: ModelReply) -> Message {
    let mut seen = HashSet::new();
    let requests = reply
        .tool_requests
        .into_iter()
        .map(|mut request| {
            if request.id.is_empty() || !seen.insert(request.id.clone()) {
                request.id = format!("call_{}", Uuid::new_v4().simple());
                seen.insert(request.id.clone());
            }
            request
        })
        .collect();
    Message::model(reply.content, requests)
}
