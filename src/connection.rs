//! Connection builder and runtime loops.
//!
//! A [`Connection`] owns one socket to the privileged peer and multiplexes
//! every logical operation over it:
//! 1. Connect (or attach to an existing stream)
//! 2. Spawn the writer task draining the outbound queue
//! 3. Spawn the read loop decoding frames and dispatching them by origin
//! 4. On any transport failure, tear down and fail every pending operation
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use privbridge::protocol::{Headers, Message, Payload};
//! use privbridge::Connection;
//!
//! # async fn run() -> privbridge::error::Result<()> {
//! let connection = Connection::builder()
//!     .max_frame_size(4 * 1024 * 1024)
//!     .connect("127.0.0.1:1720")
//!     .await?;
//!
//! let request = Message::new(
//!     "r1",
//!     Payload::HttpRequest {
//!         url: "https://example.com".into(),
//!         method: "GET".into(),
//!         headers: Headers::new(),
//!         body: Default::default(),
//!     },
//! );
//! let mut replies = connection.open_stream(request)?;
//! while let Some(event) = replies.next().await {
//!     println!("{:?}", event);
//! }
//!
//! connection.disconnect();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionConfig, DEFAULT_ADDRESS};
use crate::error::{BridgeError, OperationError, Result};
use crate::operation::{Event, OperationCallback, OperationRegistry, Ticket};
use crate::protocol::{FrameBuffer, Message, Payload};
use crate::stream::{reply_channel, ReplyStream};
use crate::writer::{outbound_queue, writer_loop, OutboundFrame, WriterHandle};

/// Status reported to WebSocket consumers when the handshake completes.
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// Lifecycle of one connection instance.
///
/// Transitions only move forward: `Connecting` → `Connected` → `Disconnected`.
/// Reconnecting means building a new [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Builder for configuring and opening a [`Connection`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum frame payload size in either direction.
    ///
    /// Default: 8 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the per-read socket buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Bound the outbound queue. `send` fails with `QueueFull` at the limit.
    ///
    /// Default: unbounded
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = Some(limit);
        self
    }

    /// Connect to the privileged peer over TCP.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Connection> {
        let shared = Shared::new(ConnectionState::Connecting);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "failed to connect to privileged peer");
                return Err(e.into());
            }
        };
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();
        tracing::info!(peer = ?peer_addr, "connected to privileged peer");

        let (reader, writer) = stream.into_split();
        Ok(Connection::start(reader, writer, shared, self.config, peer_addr))
    }

    /// Run the connection over an already-established byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach<S>(self, stream: S) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Shared::new(ConnectionState::Connecting);
        let (reader, writer) = tokio::io::split(stream);
        Connection::start(reader, writer, shared, self.config, None)
    }
}

/// State shared between the connection handle and its two tasks.
struct Shared {
    state: AtomicU8,
    registry: Arc<OperationRegistry>,
    shutdown: CancellationToken,
}

impl Shared {
    fn new(state: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(state as u8),
            registry: Arc::new(OperationRegistry::new()),
            shutdown: CancellationToken::new(),
        })
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move to `Disconnected`, fail every pending operation and stop both loops.
    ///
    /// Only the first call does anything.
    fn teardown(&self, reason: &str) {
        let previous = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Disconnected {
            return;
        }

        let drained = self.registry.drain_all(OperationError::Disconnected);
        self.shutdown.cancel();
        tracing::info!(reason, drained, "bridge connection closed");
    }
}

struct Inner {
    shared: Arc<Shared>,
    writer: WriterHandle,
    config: ConnectionConfig,
    peer_addr: Option<SocketAddr>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.teardown("connection handle dropped");
    }
}

/// Handle to a running bridge connection.
///
/// Cheap to clone; the connection is torn down when the last clone is
/// dropped or [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connect to `addr` with default configuration.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        ConnectionBuilder::new().connect(addr).await
    }

    /// Connect to the peer's default loopback address.
    pub async fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_ADDRESS).await
    }

    fn start<R, W>(
        reader: R,
        writer: W,
        shared: Arc<Shared>,
        config: ConnectionConfig,
        peer_addr: Option<SocketAddr>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_handle, queue) = outbound_queue(config.max_pending_frames);

        // Connected before the loops run, so an immediate EOF can only move forward
        shared.set_state(ConnectionState::Connected);

        let writer_shared = shared.clone();
        tokio::spawn(async move {
            let result = writer_loop(
                queue,
                writer,
                writer_shared.registry.clone(),
                writer_shared.shutdown.clone(),
            )
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "writer task failed");
                writer_shared.teardown("write failed");
            }
        });

        tokio::spawn(read_loop(
            reader,
            shared.clone(),
            config.max_frame_size,
            config.read_buffer_size,
        ));

        Connection {
            inner: Arc::new(Inner {
                shared,
                writer: writer_handle,
                config,
                peer_addr,
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Whether the connection is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Registry of operations pending on this connection.
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.inner.shared.registry
    }

    /// Remote address, when connected over TCP.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Active configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Number of frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Enqueue a message for the writer task. Never waits.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless the connection is up
    /// - `FrameTooLarge` if the encoded message exceeds the maximum frame size
    /// - `QueueFull` if a pending-frame bound is configured and reached
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let frame = OutboundFrame::encode(&message, self.inner.config.max_frame_size)?;
        self.inner.writer.send(frame)
    }

    /// Register `callback` under the message's origin and send the message.
    ///
    /// Once registered, the callback always gets a terminal event: if the
    /// message cannot be enqueued the operation is failed right away and the
    /// error is also returned. `DuplicateId` is returned without registering.
    ///
    /// The ticket names this registration for
    /// [`OperationRegistry::cancel_ticket`].
    pub fn start_operation<C>(&self, message: Message, callback: C) -> Result<Ticket>
    where
        C: OperationCallback,
    {
        let origin = message.origin.clone();
        let ticket = self.registry().register(origin.clone(), callback)?;

        if let Err(e) = self.send(message) {
            let error = match &e {
                BridgeError::NotConnected => OperationError::Disconnected,
                other => OperationError::Transport(other.to_string()),
            };
            self.registry().fail(&origin, error);
            return Err(e);
        }
        Ok(ticket)
    }

    /// Send the message and return its replies as an ordered stream.
    pub fn open_stream(&self, message: Message) -> Result<ReplyStream> {
        let (sink, mut stream) = reply_channel(message.origin.clone(), self.registry().clone());
        stream.bind(self.start_operation(message, sink)?);
        Ok(stream)
    }

    /// Close the connection. Idempotent.
    ///
    /// Every pending operation receives `Disconnected`.
    pub fn disconnect(&self) {
        self.inner.shared.teardown("disconnect requested");
    }

    /// Wait until the connection has been torn down.
    pub async fn closed(&self) {
        self.inner.shared.shutdown.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("peer_addr", &self.inner.peer_addr)
            .field("pending_operations", &self.registry().len())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

/// Main read loop - reads frames and dispatches them by origin.
async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, max_frame_size: usize, buf_size: usize)
where
    R: AsyncRead + Unpin,
{
    let result = tokio::select! {
        _ = shared.shutdown.cancelled() => return,
        result = read_frames(&mut reader, &shared.registry, max_frame_size, buf_size) => result,
    };

    match result {
        Ok(()) => shared.teardown("peer closed connection"),
        Err(e) => {
            tracing::error!(error = %e, "read loop error");
            shared.teardown("read failed");
        }
    }
}

/// Read until EOF or error. Clean EOF between frames returns `Ok(())`.
async fn read_frames<R>(
    reader: &mut R,
    registry: &OperationRegistry,
    max_frame_size: usize,
    buf_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_capacity_and_max_frame_size(buf_size, max_frame_size);
    let mut buf = vec![0u8; buf_size.max(1)];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return frame_buffer.finish();
        }

        frame_buffer.extend(&buf[..n]);
        while let Some(frame) = frame_buffer.next_frame()? {
            dispatch(registry, frame.decode()?);
        }
    }
}

/// Route one inbound message to its pending operation.
fn dispatch(registry: &OperationRegistry, message: Message) {
    let Message { origin, payload } = message;
    let kind = payload.name();

    let found = match payload {
        Payload::Headers { status, headers } => {
            registry.resolve(&origin, Event::Head { status, headers })
        }
        Payload::WebSocketOpened { headers } => registry.resolve(
            &origin,
            Event::Head {
                status: SWITCHING_PROTOCOLS,
                headers,
            },
        ),
        Payload::BodyChunk { bytes } => registry.resolve(&origin, Event::Body(bytes)),
        Payload::WebSocketMessage { kind, data } => {
            registry.resolve(&origin, Event::Message { kind, data })
        }
        Payload::WebSocketClosed { code, reason } => {
            let found = registry.resolve(&origin, Event::Closed { code, reason });
            registry.complete(&origin) || found
        }
        Payload::Complete => registry.complete(&origin),
        Payload::Error { message, code } => {
            registry.fail(&origin, OperationError::Peer { message, code })
        }
        Payload::HttpRequest { .. }
        | Payload::WebSocketOpen { .. }
        | Payload::WebSocketSend { .. }
        | Payload::WebSocketClose { .. } => registry.fail(
            &origin,
            OperationError::ProtocolViolation(format!("peer sent client-only message {}", kind)),
        ),
    };

    if !found {
        tracing::debug!(%origin, kind, "dropping reply for unknown origin");
    }
}
