//! Events and the callback seam between the registry and its consumers.
//!
//! The reader loop turns every inbound [`Payload`](crate::protocol::Payload)
//! into either a non-terminal [`Event`] or a terminal outcome. Non-terminal
//! events go through [`OperationCallback::on_event`]; the terminal outcome
//! goes through [`OperationCallback::on_terminal`], exactly once.
//!
//! # Example
//!
//! ```
//! use privbridge::error::OperationError;
//! use privbridge::operation::{CallbackError, Event, OperationCallback};
//!
//! struct Printer;
//!
//! impl OperationCallback for Printer {
//!     fn on_event(&mut self, event: Event) -> Result<(), CallbackError> {
//!         println!("{}", event.name());
//!         Ok(())
//!     }
//!
//!     fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
//!         println!("done: {:?}", outcome);
//!     }
//! }
//! ```

use bytes::Bytes;
use thiserror::Error;

use crate::error::OperationError;
use crate::protocol::{Headers, MessageKind};

/// Non-terminal event for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Status and headers. First event of every operation.
    Head { status: u16, headers: Headers },
    /// HTTP response body chunk.
    Body(Bytes),
    /// WebSocket frame from the remote end.
    Message { kind: MessageKind, data: Bytes },
    /// The remote end closed the WebSocket; the operation completes next.
    Closed { code: u16, reason: String },
}

impl Event {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Head { .. } => "head",
            Event::Body(_) => "body",
            Event::Message { .. } => "message",
            Event::Closed { .. } => "closed",
        }
    }
}

/// Why a callback refused an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// Whoever was listening has gone away.
    #[error("receiver gone")]
    ReceiverGone,

    /// The callback rejected the event and wants the operation failed with this error.
    #[error("rejected: {0}")]
    Rejected(OperationError),
}

/// Consumer of one operation's events.
///
/// Callbacks run on the reader task and must not block or await. They may
/// complete, fail or cancel operations in the registry that owns them, their
/// own included; that takes effect once the callback returns. They must not
/// resolve events into their own id.
pub trait OperationCallback: Send + 'static {
    /// Deliver a non-terminal event.
    ///
    /// Returning an error retires the operation; the registry then calls
    /// [`on_terminal`](Self::on_terminal) with the resulting error.
    fn on_event(&mut self, event: Event) -> Result<(), CallbackError>;

    /// Deliver the terminal outcome. Called exactly once per registered operation,
    /// unless the operation is canceled.
    fn on_terminal(&mut self, outcome: Result<(), OperationError>);
}

impl OperationCallback for Box<dyn OperationCallback> {
    fn on_event(&mut self, event: Event) -> Result<(), CallbackError> {
        (**self).on_event(event)
    }

    fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
        (**self).on_terminal(outcome)
    }
}
