//! Bounded delivery of committed messages to a run's consumer

use super::RunError;
use crate::message::Message;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One stream item: a committed message, or the terminal error (always last)
pub type RunItem = Result<Message, RunError>;

#[derive(Debug, Clone, Copy, Error)]
#[error("message stream consumer is gone")]
pub struct ConsumerGone;

/// Create a connected emitter/stream pair. `capacity` bounds how far the run
/// may get ahead of its consumer; zero is treated as one.
pub fn channel(capacity: usize) -> (Emitter, MessageStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Emitter { tx },
        MessageStream {
            inner: ReceiverStream::new(rx),
        },
    )
}

/// Producer side, owned by the run. The stream ends once every clone is
/// dropped.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<RunItem>,
}

impl Emitter {
    /// Deliver a message, waiting while the buffer is full.
    pub async fn emit(&self, message: Message) -> Result<(), ConsumerGone> {
        self.tx.send(Ok(message)).await.map_err(|_| ConsumerGone)
    }

    pub async fn fail(&self, error: RunError) -> Result<(), ConsumerGone> {
        self.tx.send(Err(error)).await.map_err(|_| ConsumerGone)
    }

    /// Resolves once the consumer dropped its stream
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a run. Dropping it tells the run to stop.
pub struct MessageStream {
    inner: ReceiverStream<RunItem>,
}

impl MessageStream {
    /// Stop accepting messages; already buffered items can still be read
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Stream for MessageStream {
    type Item = RunItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunItem>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
