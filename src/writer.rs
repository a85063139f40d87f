//! Dedicated writer task for the outbound queue.
//!
//! Every producer enqueues encoded frames through a cloneable [`WriterHandle`];
//! a single task owns the socket's write half and writes them in FIFO order.
//! Frames are never interleaved because nothing else touches the socket.
//!
//! # Architecture
//!
//! ```text
//! HTTP session ─┐
//! WebSocket    ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Socket
//! Service      ─┘
//! ```
//!
//! Each frame is written fully and flushed before the next one is taken.
//! On a write failure the task fails the operation of the frame in flight,
//! closes the queue, fails every still-queued frame's operation with a
//! transport error and returns the error.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, OperationError, Result};
use crate::operation::OperationRegistry;
use crate::protocol::{encode_frame_parts, Message, HEADER_SIZE};

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Origin of the message, used to fail the operation if the write fails.
    pub origin: String,
    /// Encoded length prefix.
    pub header: [u8; HEADER_SIZE],
    /// Encoded message.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Encode a message into a frame.
    ///
    /// Fails with `FrameTooLarge` if the encoded message exceeds `max_frame_size`.
    pub fn encode(message: &Message, max_frame_size: usize) -> Result<Self> {
        let (header, payload) = encode_frame_parts(message, max_frame_size)?;
        Ok(Self {
            origin: message.origin.clone(),
            header,
            payload,
        })
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Handle for enqueueing frames to the writer task.
///
/// Cheap to clone. Enqueueing never waits.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: Option<usize>,
}

impl WriterHandle {
    /// Enqueue a frame.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the writer task has stopped
    /// - `QueueFull` if a pending-frame bound is configured and reached
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        if let Some(max) = self.max_pending {
            let current = self.pending.load(Ordering::Acquire);
            if current >= max {
                return Err(BridgeError::QueueFull(current));
            }
        }

        // Increment BEFORE sending so the writer never sees a negative count
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            BridgeError::NotConnected
        })
    }

    /// Number of frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped accepting frames.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the outbound queue, consumed by [`writer_loop`].
pub struct WriterQueue {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

/// Create the outbound queue.
pub fn outbound_queue(max_pending: Option<usize>) -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending,
    };
    (handle, WriterQueue { rx, pending })
}

/// Main writer loop - takes frames in order and writes them to the socket.
///
/// Returns `Ok(())` when `shutdown` fires or every handle is dropped, and
/// the write error otherwise. Either way no frame is left in the queue
/// without its operation having been failed.
pub async fn writer_loop<W>(
    mut queue: WriterQueue,
    mut writer: W,
    registry: Arc<OperationRegistry>,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = queue.rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        queue.pending.fetch_sub(1, Ordering::Release);

        let written = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                registry.fail(&frame.origin, OperationError::Disconnected);
                break;
            }
            written = write_frame(&mut writer, &frame) => written,
        };

        if let Err(e) = written {
            tracing::error!(origin = %frame.origin, error = %e, "frame write failed");
            let reason = e.to_string();
            registry.fail(&frame.origin, OperationError::Transport(reason.clone()));
            fail_queued(&mut queue, &registry, OperationError::Transport(reason));
            return Err(e);
        }
    }

    fail_queued(&mut queue, &registry, OperationError::Disconnected);
    let _ = writer.shutdown().await;
    Ok(())
}

/// Close the queue and fail the operation of every frame still in it.
fn fail_queued(queue: &mut WriterQueue, registry: &OperationRegistry, error: OperationError) {
    queue.rx.close();
    let mut dropped = 0usize;
    while let Ok(frame) = queue.rx.try_recv() {
        queue.pending.fetch_sub(1, Ordering::Release);
        registry.fail(&frame.origin, error.clone());
        dropped += 1;
    }
    if dropped > 0 {
        tracing::warn!(dropped, "discarded queued frames that were never sent");
    }
}

/// Write one frame using scatter/gather I/O, then flush.
async fn write_frame<W>(writer: &mut W, frame: &OutboundFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total = frame.size();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(frame, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlices for the part of `frame` after the first `skip` bytes.
fn remaining_slices(frame: &OutboundFrame, skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(2);
    if skip < HEADER_SIZE {
        slices.push(IoSlice::new(&frame.header[skip..]));
    }
    let payload_skip = skip.saturating_sub(HEADER_SIZE);
    if payload_skip < frame.payload.len() {
        slices.push(IoSlice::new(&frame.payload[payload_skip..]));
    }
    slices
}
