//! Scripted fake privileged peer shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use privbridge::protocol::{encode_frame, read_message, Headers, Message, Payload, DEFAULT_MAX_FRAME_SIZE};
use privbridge::Connection;
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};

/// The far end of a bridge connection, driven step by step by a test.
pub struct FakePeer<S> {
    io: S,
}

impl<S> FakePeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self { io }
    }

    /// Next message sent by the client.
    pub async fn recv(&mut self) -> Message {
        read_message(&mut self.io, DEFAULT_MAX_FRAME_SIZE)
            .await
            .expect("client message")
    }

    pub async fn send(&mut self, origin: &str, payload: Payload) {
        let frame = encode_frame(&Message::new(origin, payload)).expect("encode");
        self.io.write_all(&frame).await.expect("peer write");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.expect("peer write");
    }

    pub async fn headers(&mut self, origin: &str, status: u16) {
        self.send(
            origin,
            Payload::Headers {
                status,
                headers: Headers::new(),
            },
        )
        .await;
    }

    pub async fn chunk(&mut self, origin: &str, bytes: &'static [u8]) {
        self.send(
            origin,
            Payload::BodyChunk {
                bytes: Bytes::from_static(bytes),
            },
        )
        .await;
    }

    pub async fn complete(&mut self, origin: &str) {
        self.send(origin, Payload::Complete).await;
    }
}

/// A connection attached to an in-memory fake peer.
pub fn attached() -> (Connection, FakePeer<DuplexStream>) {
    let (client, peer) = duplex(256 * 1024);
    (Connection::builder().attach(client), FakePeer::new(peer))
}

pub fn get(origin: &str, url: &str) -> Message {
    Message::new(
        origin,
        Payload::HttpRequest {
            url: url.into(),
            method: "GET".into(),
            headers: Headers::new(),
            body: Bytes::new(),
        },
    )
}

/// Install a test subscriber once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
