//! Push-callback traits for service consumers and their registry adapters.

use bytes::Bytes;

use crate::error::OperationError;
use crate::operation::{CallbackError, Event, OperationCallback};
use crate::protocol::{Headers, MessageKind};
use crate::stream::Stage;

/// Code reported to `on_error` for failures that did not come from the peer.
pub const LOCAL_ERROR_CODE: i32 = -1;

/// Receiver of one HTTP request's progress.
///
/// Every method may report [`CallbackError::ReceiverGone`] when whoever
/// was listening has died; the request is then retired.
///
/// Methods run on the connection's reader task, one at a time. They must not
/// block or await. They may call back into [`BridgeService`](super::BridgeService),
/// including for their own id.
pub trait HttpCallback: Send + 'static {
    fn on_headers(&mut self, id: &str, status: u16, headers: &Headers) -> Result<(), CallbackError>;

    fn on_data(&mut self, id: &str, data: Bytes) -> Result<(), CallbackError>;

    fn on_complete(&mut self, id: &str) -> Result<(), CallbackError>;

    fn on_error(&mut self, id: &str, message: &str, code: i32) -> Result<(), CallbackError>;
}

/// Receiver of one WebSocket's lifecycle.
///
/// Same rules as [`HttpCallback`]: no blocking, re-entry is allowed. Calling
/// [`close_websocket`](super::BridgeService::close_websocket) from
/// `on_message` retires the socket once `on_message` returns.
pub trait WebSocketCallback: Send + 'static {
    fn on_open(&mut self, id: &str, headers: &Headers) -> Result<(), CallbackError>;

    fn on_message(&mut self, id: &str, kind: MessageKind, data: Bytes) -> Result<(), CallbackError>;

    fn on_close(&mut self, id: &str, code: u16, reason: &str) -> Result<(), CallbackError>;

    fn on_error(&mut self, id: &str, message: &str, code: i32) -> Result<(), CallbackError>;
}

/// Split a terminal error into the `(message, code)` pair callbacks receive.
pub(crate) fn error_parts(error: &OperationError) -> (String, i32) {
    match error {
        OperationError::Peer { message, code } => (message.clone(), *code),
        OperationError::Transport(message) => (message.clone(), LOCAL_ERROR_CODE),
        other => (other.to_string(), LOCAL_ERROR_CODE),
    }
}

fn unexpected(event: &Event, what: &str) -> CallbackError {
    CallbackError::Rejected(OperationError::ProtocolViolation(format!(
        "unexpected {} for {}",
        event.name(),
        what
    )))
}

/// Adapts an [`HttpCallback`] to the registry.
pub(crate) struct HttpAdapter<C> {
    id: String,
    callback: C,
    stage: Stage,
}

impl<C> HttpAdapter<C> {
    pub(crate) fn new(id: String, callback: C) -> Self {
        Self {
            id,
            callback,
            stage: Stage::default(),
        }
    }
}

impl<C: HttpCallback> OperationCallback for HttpAdapter<C> {
    fn on_event(&mut self, event: Event) -> Result<(), CallbackError> {
        self.stage.advance(&event)?;
        match event {
            Event::Head { status, headers } => self.callback.on_headers(&self.id, status, &headers),
            Event::Body(data) => self.callback.on_data(&self.id, data),
            other => Err(unexpected(&other, "http request")),
        }
    }

    fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
        let result = match outcome.and_then(|()| self.stage.complete()) {
            Ok(()) => self.callback.on_complete(&self.id),
            Err(error) => {
                let (message, code) = error_parts(&error);
                self.callback.on_error(&self.id, &message, code)
            }
        };
        if let Err(e) = result {
            tracing::debug!(id = %self.id, error = %e, "terminal callback not delivered");
        }
    }
}

/// Adapts a [`WebSocketCallback`] to the registry.
pub(crate) struct WebSocketAdapter<C> {
    id: String,
    callback: C,
    stage: Stage,
}

impl<C> WebSocketAdapter<C> {
    pub(crate) fn new(id: String, callback: C) -> Self {
        Self {
            id,
            callback,
            stage: Stage::default(),
        }
    }
}

impl<C: WebSocketCallback> OperationCallback for WebSocketAdapter<C> {
    fn on_event(&mut self, event: Event) -> Result<(), CallbackError> {
        self.stage.advance(&event)?;
        match event {
            Event::Head { headers, .. } => self.callback.on_open(&self.id, &headers),
            Event::Message { kind, data } => self.callback.on_message(&self.id, kind, data),
            Event::Closed { code, reason } => self.callback.on_close(&self.id, code, &reason),
            other => Err(unexpected(&other, "websocket")),
        }
    }

    fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
        // Success means closed, already reported through on_close or requested locally
        let Err(error) = outcome else {
            return;
        };
        let (message, code) = error_parts(&error);
        if let Err(e) = self.callback.on_error(&self.id, &message, code) {
            tracing::debug!(id = %self.id, error = %e, "terminal callback not delivered");
        }
    }
}
