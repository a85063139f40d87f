//! Echo Peer - a stand-in for the privileged side of the bridge.
//!
//! Answers every HTTP request with its own method, URL and body, and
//! echoes WebSocket frames back. Useful for trying the `fetch` demo.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example echo_peer -- 127.0.0.1:1720
//! ```

use bytes::Bytes;
use privbridge::error::BridgeError;
use privbridge::protocol::{
    encode_frame, read_message, Headers, Message, Payload, DEFAULT_MAX_FRAME_SIZE,
};
use privbridge::DEFAULT_ADDRESS;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

const CHUNK_SIZE: usize = 16;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "echo peer listening");

    loop {
        let (socket, remote) = listener.accept().await?;
        tracing::info!(%remote, "client connected");
        tokio::spawn(async move {
            match serve(socket).await {
                Ok(()) => tracing::info!(%remote, "client disconnected"),
                Err(e) => tracing::warn!(%remote, error = %e, "client session failed"),
            }
        });
    }
}

async fn serve(mut socket: TcpStream) -> Result<(), BridgeError> {
    loop {
        let message = match read_message(&mut socket, DEFAULT_MAX_FRAME_SIZE).await {
            Ok(message) => message,
            // Clean close between frames
            Err(BridgeError::TruncatedFrame { actual: 0, .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::debug!(origin = %message.origin, kind = message.payload.name(), "received");

        for reply in respond(message) {
            socket.write_all(&encode_frame(&reply)?).await?;
        }
    }
}

fn respond(message: Message) -> Vec<Message> {
    let Message { origin, payload } = message;
    let reply = |payload| Message::new(origin.clone(), payload);

    match payload {
        Payload::HttpRequest {
            url,
            method,
            body,
            ..
        } => {
            if !url.starts_with("http") {
                return vec![reply(Payload::Error {
                    message: format!("unsupported url: {}", url),
                    code: 500,
                })];
            }

            let mut headers = Headers::new();
            headers.insert("Content-Type".into(), "text/plain".into());
            let mut echoed = format!("{} {}\n", method, url).into_bytes();
            echoed.extend_from_slice(&body);

            let mut replies = vec![reply(Payload::Headers {
                status: 200,
                headers,
            })];
            replies.extend(echoed.chunks(CHUNK_SIZE).map(|chunk| {
                reply(Payload::BodyChunk {
                    bytes: Bytes::copy_from_slice(chunk),
                })
            }));
            replies.push(reply(Payload::Complete));
            replies
        }
        Payload::WebSocketOpen { headers, .. } => vec![reply(Payload::WebSocketOpened { headers })],
        Payload::WebSocketSend { kind, data } => {
            vec![reply(Payload::WebSocketMessage { kind, data })]
        }
        Payload::WebSocketClose { code, reason } => {
            vec![reply(Payload::WebSocketClosed { code, reason })]
        }
        other => {
            tracing::warn!(%origin, kind = other.name(), "ignoring peer-only message");
            Vec::new()
        }
    }
}
