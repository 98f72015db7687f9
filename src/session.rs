//! Sessions: exclusive handles onto conversations
//!
//! A conversation id has at most one open session, and a session drives at
//! most one run at a time. That is what keeps two runs from ever appending
//! to the same history concurrently.

use crate::llm::ModelProvider;
use crate::message::Message;
use crate::runtime::{channel, Emitter, MessageStream, Orchestrator, RunOutcome};
use crate::store::{ConversationStore, StoreError};
use crate::tools::ToolExecutor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default stream buffer: a run may get one message ahead of its consumer
pub const DEFAULT_EMIT_BUFFER: usize = 1;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Conversation {0} already has an active session or run")]
    DuplicateActiveSession(String),
    #[error("Session is closed")]
    SessionClosed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller's handle on an open conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    session_id: Uuid,
    conversation_id: String,
}

impl SessionHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

struct SessionSlot {
    session_id: Uuid,
    /// Parent of every run token of this session
    cancel: CancellationToken,
    /// Cleared by the run's own `RunGuard`
    run: Option<ActiveRun>,
    closed: bool,
}

struct ActiveRun {
    id: Uuid,
    task: JoinHandle<RunOutcome>,
}

impl SessionSlot {
    fn run_active(&self) -> bool {
        self.run.is_some()
    }
}

type Slots = Arc<Mutex<HashMap<String, SessionSlot>>>;

fn lock(slots: &Mutex<HashMap<String, SessionSlot>>) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned by a run task. Dropping it marks the run finished (and forgets a
/// closed session) before the held emitter clone goes, so a consumer that
/// saw its stream end can always submit again.
struct RunGuard {
    slots: Slots,
    conversation_id: String,
    run_id: Uuid,
    _emitter: Emitter,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&self.conversation_id) else {
            return;
        };
        if slot.run.as_ref().is_some_and(|run| run.id == self.run_id) {
            slot.run = None;
            if slot.closed {
                slots.remove(&self.conversation_id);
            }
        }
    }
}

/// Manager for all open sessions
pub struct SessionManager<S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    orchestrator: Arc<Orchestrator<S, P, T>>,
    emit_buffer: usize,
    slots: Slots,
}

impl<S, P, T> SessionManager<S, P, T>
where
    S: ConversationStore + 'static,
    P: ModelProvider + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(orchestrator: Orchestrator<S, P, T>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            emit_buffer: DEFAULT_EMIT_BUFFER,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_emit_buffer(mut self, emit_buffer: usize) -> Self {
        self.emit_buffer = emit_buffer;
        self
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        lock(&self.slots)
    }

    /// Open a session on an existing conversation, or a new one when `None`.
    /// An unknown id is created, so a conversation persisted by an earlier
    /// process can be resumed by id.
    pub async fn open(&self, conversation_id: Option<String>) -> Result<SessionHandle, SessionError> {
        let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_id = Uuid::new_v4();

        {
            let mut slots = self.slots();
            if let Some(existing) = slots.get(&conversation_id) {
                // a closed session may still be winding down its last run
                if !existing.closed || existing.run_active() {
                    return Err(SessionError::DuplicateActiveSession(conversation_id));
                }
            }
            slots.insert(
                conversation_id.clone(),
                SessionSlot {
                    session_id,
                    cancel: CancellationToken::new(),
                    run: None,
                    closed: false,
                },
            );
        }

        match self.orchestrator.store().get_or_create(&conversation_id).await {
            Ok(created) => {
                tracing::info!(conv_id = %conversation_id, %session_id, created, "Session opened");
            }
            Err(e) => {
                let mut slots = self.slots();
                if slots.get(&conversation_id).is_some_and(|s| s.session_id == session_id) {
                    slots.remove(&conversation_id);
                }
                return Err(e.into());
            }
        }

        Ok(SessionHandle {
            session_id,
            conversation_id,
        })
    }

    /// Start a run for `text` and return its message stream.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `DuplicateActiveSession` while the previous run is still going.
    pub fn submit(&self, handle: &SessionHandle, text: impl Into<String>) -> Result<MessageStream, SessionError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&handle.conversation_id)
            .filter(|slot| slot.session_id == handle.session_id && !slot.closed)
            .ok_or(SessionError::SessionClosed)?;
        if slot.run_active() {
            return Err(SessionError::DuplicateActiveSession(handle.conversation_id.clone()));
        }

        let (emitter, stream) = channel(self.emit_buffer);
        let cancel = slot.cancel.child_token();
        let orchestrator = Arc::clone(&self.orchestrator);
        let conversation_id = handle.conversation_id.clone();
        let text = text.into();
        let run_id = Uuid::new_v4();
        let guard = RunGuard {
            slots: Arc::clone(&self.slots),
            conversation_id: conversation_id.clone(),
            run_id,
            _emitter: emitter.clone(),
        };

        // The slots lock is held until `slot.run` is set, so the guard can
        // never drop before it.
        let task = tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run(&conversation_id, text, emitter, cancel).await
        });
        slot.run = Some(ActiveRun { id: run_id, task });
        Ok(stream)
    }

    /// Close the session and stop its run. Idempotent.
    pub fn close(&self, handle: &SessionHandle) {
        let mut slots = self.slots();
        let Some(slot) = slots
            .get_mut(&handle.conversation_id)
            .filter(|slot| slot.session_id == handle.session_id && !slot.closed)
        else {
            return;
        };

        slot.closed = true;
        slot.cancel.cancel();
        if !slot.run_active() {
            slots.remove(&handle.conversation_id);
        }
        tracing::info!(conv_id = %handle.conversation_id, "Session closed");
    }

    /// Committed history of the session's conversation
    pub async fn history(&self, handle: &SessionHandle) -> Result<Vec<Message>, SessionError> {
        if !self.is_open(handle) {
            return Err(SessionError::SessionClosed);
        }
        Ok(self.orchestrator.store().snapshot(&handle.conversation_id).await?)
    }

    pub fn is_open(&self, handle: &SessionHandle) -> bool {
        self.slots()
            .get(&handle.conversation_id)
            .is_some_and(|slot| slot.session_id == handle.session_id && !slot.closed)
    }

    pub fn is_running(&self, handle: &SessionHandle) -> bool {
        self.slots()
            .get(&handle.conversation_id)
            .is_some_and(|slot| slot.session_id == handle.session_id && slot.run_active())
    }

    /// Close every session and wait for their runs to stop
    pub async fn shutdown(&self) {
        let runs: Vec<_> = {
            let mut slots = self.slots();
            slots
                .drain()
                .filter_map(|(_, mut slot)| {
                    slot.cancel.cancel();
                    slot.run.take().map(|run| run.task)
                })
                .collect()
        };
        for run in runs {
            if let Err(e) = run.await {
                tracing::warn!(error = %e, "Run task failed during shutdown");
            }
        }
    }
}
