//! Session module - typed HTTP and WebSocket clients over a [`Connection`].
//!
//! Provides:
//! - [`HttpClient`] - request/response with a streamed [`Body`]
//! - [`WebSocketClient`] - open a [`WebSocket`] and exchange messages
//!
//! [`Connection`]: crate::connection::Connection

mod http;
mod websocket;

pub use http::{Body, HttpClient, HttpMethod, HttpRequest, Response};
pub use websocket::{WebSocket, WebSocketClient, WebSocketEvent, WebSocketSender};

use futures::StreamExt;

use crate::error::{OperationError, Result};
use crate::operation::Event;
use crate::protocol::Headers;
use crate::stream::ReplyStream;

/// Wait for the first event of an operation, which must be its head.
async fn await_head(replies: &mut ReplyStream) -> Result<(u16, Headers)> {
    match replies.next().await {
        Some(Ok(Event::Head { status, headers })) => Ok((status, headers)),
        Some(Ok(other)) => Err(OperationError::ProtocolViolation(format!(
            "{} before headers",
            other.name()
        ))
        .into()),
        Some(Err(error)) => Err(error.into()),
        // Cancelled without a terminal event
        None => Err(OperationError::Disconnected.into()),
    }
}
