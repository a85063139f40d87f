//! WebSocket over the bridge.
//!
//! The peer owns the real socket; this side sees one long-lived operation
//! whose head is the handshake result and whose events are the frames.
//! Outgoing frames travel as separate messages under the same origin.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::stream::{FusedStream, Stream, StreamExt};

use super::await_head;
use crate::connection::Connection;
use crate::error::{BridgeError, OperationError, Result};
use crate::operation::{new_origin, Event};
use crate::protocol::{Headers, Message, MessageKind, Payload, NORMAL_CLOSURE};
use crate::stream::ReplyStream;

/// Event received on an open [`WebSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketEvent {
    /// Text frame. Invalid UTF-8 is replaced.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// The remote end closed the socket. Always the last event.
    Closed { code: u16, reason: String },
}

/// Opens WebSockets through the privileged peer.
#[derive(Debug, Clone)]
pub struct WebSocketClient {
    connection: Connection,
}

impl WebSocketClient {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Open a WebSocket to `url` and wait for the handshake.
    pub async fn connect(&self, url: impl Into<String>, headers: Headers) -> Result<WebSocket> {
        let url = url.into();
        let origin = new_origin();
        tracing::debug!(%origin, %url, "websocket open");

        let message = Message::new(origin.clone(), Payload::WebSocketOpen { url, headers });
        let mut replies = self.connection.open_stream(message)?;
        let (_, headers) = await_head(&mut replies).await?;

        Ok(WebSocket {
            sender: WebSocketSender {
                origin,
                connection: self.connection.clone(),
            },
            headers,
            replies,
            closed: false,
        })
    }
}

/// Cloneable sending half of a [`WebSocket`].
#[derive(Debug, Clone)]
pub struct WebSocketSender {
    origin: String,
    connection: Connection,
}

impl WebSocketSender {
    /// Origin id of the socket.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Send a frame.
    pub fn send(&self, kind: MessageKind, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        self.connection.send(Message::new(
            self.origin.clone(),
            Payload::WebSocketSend { kind, data },
        ))
    }

    /// Send a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(MessageKind::Text, Bytes::from(text.into()))
    }

    /// Send a binary frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(MessageKind::Binary, data)
    }

    /// Ask the peer to close the socket and stop listening for its frames.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        let result = self.connection.send(Message::new(
            self.origin.clone(),
            Payload::WebSocketClose {
                code,
                reason: reason.into(),
            },
        ));
        self.connection.registry().cancel(&self.origin);
        result
    }
}

/// An open WebSocket.
///
/// Yields [`WebSocketEvent`]s until the remote end closes. Dropping it
/// without closing sends a normal closure to the peer.
#[derive(Debug)]
pub struct WebSocket {
    sender: WebSocketSender,
    headers: Headers,
    replies: ReplyStream,
    closed: bool,
}

impl WebSocket {
    /// Origin id of the socket.
    pub fn origin(&self) -> &str {
        self.sender.origin()
    }

    /// Headers from the handshake response.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// A sending handle that can move to another task.
    pub fn sender(&self) -> WebSocketSender {
        self.sender.clone()
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.sender.send_text(text)
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.sender.send_binary(data)
    }

    /// Close the socket with `code` and `reason`.
    pub fn close(mut self, code: u16, reason: impl Into<String>) -> Result<()> {
        self.closed = true;
        self.sender.close(code, reason)
    }
}

impl Stream for WebSocket {
    type Item = std::result::Result<WebSocketEvent, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = match ready!(self.replies.poll_next_unpin(cx)) {
            Some(Ok(Event::Message { kind, data })) => Ok(match kind {
                MessageKind::Text => {
                    WebSocketEvent::Text(String::from_utf8_lossy(&data).into_owned())
                }
                MessageKind::Binary => WebSocketEvent::Binary(data),
            }),
            Some(Ok(Event::Closed { code, reason })) => {
                self.closed = true;
                Ok(WebSocketEvent::Closed { code, reason })
            }
            Some(Ok(other)) => Err(OperationError::ProtocolViolation(format!(
                "unexpected {} on websocket",
                other.name()
            ))
            .into()),
            // Closed locally through a sender
            Some(Err(OperationError::Cancelled)) | None => {
                self.closed = true;
                return Poll::Ready(None);
            }
            Some(Err(error)) => {
                self.closed = true;
                Err(error.into())
            }
        };
        Poll::Ready(Some(item))
    }
}

impl FusedStream for WebSocket {
    fn is_terminated(&self) -> bool {
        self.replies.is_terminated()
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        if self.closed || !self.sender.connection.is_connected() {
            return;
        }
        if let Err(e) = self.sender.close(NORMAL_CLOSURE, "") {
            tracing::debug!(origin = %self.sender.origin, error = %e, "close on drop failed");
        }
    }
}
