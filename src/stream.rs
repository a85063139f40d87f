//! Stream adapter: push callbacks in, ordered pull stream out.
//!
//! [`reply_channel`] creates a [`StreamSink`] (registered with the
//! [`OperationRegistry`] as the operation's callback) and a [`ReplyStream`]
//! (handed to the caller). The sink runs on the reader task and only ever
//! pushes into an unbounded channel, so a slow consumer never stalls replies
//! for other operations.
//!
//! The sink enforces the reply order: one `Head`, then any number of data
//! events, then exactly one terminal outcome. Anything else ends the stream
//! with [`OperationError::ProtocolViolation`].
//!
//! Dropping a [`ReplyStream`] before its terminal event cancels the
//! registration it is bound to, identified by its [`Ticket`], so a stale
//! stream never cancels a newer operation that reuses the origin id. Nothing
//! is sent to the peer; late replies are discarded by the reader loop. If the
//! operation is cancelled by anyone else, the stream ends with
//! [`OperationError::Cancelled`] rather than a silent `None`.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::stream::{FusedStream, Stream};
use tokio::sync::mpsc;

use crate::error::OperationError;
use crate::operation::{CallbackError, Event, OperationCallback, OperationRegistry, Ticket};

type Item = Result<Event, OperationError>;

/// Reply ordering: one `Head`, then data, then the terminal outcome.
///
/// Shared by every push consumer so they reject the same sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Stage {
    #[default]
    AwaitingHead,
    Streaming,
}

impl Stage {
    /// Move past `event`, or reject it as out of order.
    pub(crate) fn advance(&mut self, event: &Event) -> Result<(), CallbackError> {
        let violation = match (*self, event) {
            (Stage::AwaitingHead, Event::Head { .. }) => {
                *self = Stage::Streaming;
                return Ok(());
            }
            (Stage::Streaming, Event::Head { .. }) => "duplicate headers".to_string(),
            (Stage::AwaitingHead, other) => format!("{} before headers", other.name()),
            (Stage::Streaming, _) => return Ok(()),
        };
        Err(CallbackError::Rejected(OperationError::ProtocolViolation(violation)))
    }

    /// Check a successful terminal against what was seen so far.
    pub(crate) fn complete(self) -> Result<(), OperationError> {
        match self {
            Stage::AwaitingHead => Err(OperationError::ProtocolViolation(
                "complete before headers".to_string(),
            )),
            Stage::Streaming => Ok(()),
        }
    }
}

/// Registry-side half of a reply channel.
pub struct StreamSink {
    tx: Option<mpsc::UnboundedSender<Item>>,
    stage: Stage,
}

impl StreamSink {
    fn push(&self, item: Item) -> Result<(), CallbackError> {
        let tx = self.tx.as_ref().ok_or(CallbackError::ReceiverGone)?;
        tx.send(item).map_err(|_| CallbackError::ReceiverGone)
    }
}

impl OperationCallback for StreamSink {
    fn on_event(&mut self, event: Event) -> Result<(), CallbackError> {
        self.stage.advance(&event)?;
        self.push(Ok(event))
    }

    fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
        if let Err(error) = outcome.and_then(|()| self.stage.complete()) {
            // Receiver may already be gone; nothing left to tell it
            let _ = self.push(Err(error));
        }
        self.tx = None;
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        // Dropped without a terminal: the operation was cancelled
        if self.tx.is_some() {
            let _ = self.push(Err(OperationError::Cancelled));
        }
    }
}

/// Caller-side half of a reply channel.
///
/// Yields `Ok(event)` in arrival order. Ends with `None` after successful
/// completion, or with a single `Err` followed by `None` on failure.
pub struct ReplyStream {
    origin: String,
    rx: mpsc::UnboundedReceiver<Item>,
    registry: Arc<OperationRegistry>,
    ticket: Option<Ticket>,
    finished: bool,
}

impl ReplyStream {
    /// Origin id of the underlying operation.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether the terminal event has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Tie the stream to the registration of its sink.
    ///
    /// An unbound stream never cancels anything on drop, which is what a
    /// failed registration needs: the id may belong to someone else.
    pub fn bind(&mut self, ticket: Ticket) {
        self.ticket = Some(ticket);
    }

    /// Abandon the operation now.
    pub fn cancel(mut self) {
        self.cancel_in_registry();
    }

    fn cancel_in_registry(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let Some(ticket) = self.ticket else {
            return;
        };
        if self.registry.cancel_ticket(&self.origin, ticket) {
            tracing::debug!(origin = %self.origin, "reply stream dropped before completion");
        }
    }
}

impl fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyStream")
            .field("origin", &self.origin)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for ReplyStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(event)) => Poll::Ready(Some(Ok(event))),
            Some(Err(error)) => {
                self.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            None => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for ReplyStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.cancel_in_registry();
    }
}

/// Create a sink/stream pair for the operation `origin`.
///
/// The caller registers the sink with `registry` under `origin` and passes
/// the returned ticket to [`ReplyStream::bind`].
pub fn reply_channel(
    origin: impl Into<String>,
    registry: Arc<OperationRegistry>,
) -> (StreamSink, ReplyStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = StreamSink {
        tx: Some(tx),
        stage: Stage::default(),
    };
    let stream = ReplyStream {
        origin: origin.into(),
        rx,
        registry,
        ticket: None,
        finished: false,
    };
    (sink, stream)
}
