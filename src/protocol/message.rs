//! Tagged messages carried inside frames.
//!
//! Every message names the logical operation it belongs to through its
//! `origin`. The payload set is closed: four request kinds travel from the
//! client to the peer, seven reply kinds travel back.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header map carried by HTTP and WebSocket messages.
///
/// Sorted so that a given message always encodes to the same bytes.
pub type Headers = BTreeMap<String, String>;

/// Default close code for a normal WebSocket closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque id of the operation this message belongs to.
    pub origin: String,
    /// The tagged body.
    pub payload: Payload,
}

impl Message {
    /// Create a message for the given origin.
    pub fn new(origin: impl Into<String>, payload: Payload) -> Self {
        Self {
            origin: origin.into(),
            payload,
        }
    }
}

/// WebSocket frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Binary,
}

/// Closed set of payload kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Ask the peer to perform an HTTP request.
    HttpRequest {
        url: String,
        method: String,
        headers: Headers,
        body: Bytes,
    },
    /// Ask the peer to open a WebSocket.
    WebSocketOpen { url: String, headers: Headers },
    /// Send a frame on an open WebSocket.
    WebSocketSend { kind: MessageKind, data: Bytes },
    /// Close an open WebSocket.
    WebSocketClose { code: u16, reason: String },

    /// HTTP status line and headers.
    Headers { status: u16, headers: Headers },
    /// A piece of the HTTP response body.
    BodyChunk { bytes: Bytes },
    /// The HTTP response finished.
    Complete,
    /// The operation failed on the peer side.
    Error { message: String, code: i32 },
    /// The WebSocket handshake succeeded.
    WebSocketOpened { headers: Headers },
    /// A frame received on the WebSocket.
    WebSocketMessage { kind: MessageKind, data: Bytes },
    /// The remote end closed the WebSocket.
    WebSocketClosed { code: u16, reason: String },
}

impl Payload {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::HttpRequest { .. } => "http_request",
            Payload::WebSocketOpen { .. } => "web_socket_open",
            Payload::WebSocketSend { .. } => "web_socket_send",
            Payload::WebSocketClose { .. } => "web_socket_close",
            Payload::Headers { .. } => "headers",
            Payload::BodyChunk { .. } => "body_chunk",
            Payload::Complete => "complete",
            Payload::Error { .. } => "error",
            Payload::WebSocketOpened { .. } => "web_socket_opened",
            Payload::WebSocketMessage { .. } => "web_socket_message",
            Payload::WebSocketClosed { .. } => "web_socket_closed",
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_name() {
        assert_eq!(Payload::Complete.to_string(), "complete");
        assert_eq!(
            Payload::BodyChunk {
                bytes: Bytes::from_static(b"x")
            }
            .to_string(),
            "body_chunk"
        );
    }

    #[test]
    fn test_message_new() {
        let message = Message::new("r1", Payload::Complete);
        assert_eq!(message.origin, "r1");
        assert_eq!(message.payload, Payload::Complete);
    }
}
