//! Error types for privbridge.
//!
//! There are two layers. [`BridgeError`] is what fallible calls return.
//! [`OperationError`] is the terminal error delivered to a single operation;
//! it is cheap to clone because teardown hands the same error to every
//! pending operation.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// The byte stream ended in the middle of a frame.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// A complete frame was read but its payload is not a valid message.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The length prefix announced more bytes than the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// An operation with this origin id is already pending.
    #[error("Duplicate operation id: {0}")]
    DuplicateId(String),

    /// No operation is pending under this origin id.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The connection is not (or no longer) established.
    #[error("Privileged client not connected")]
    NotConnected,

    /// The caller-bounded outbound queue is full.
    #[error("Outbound queue full ({0} frames pending)")]
    QueueFull(usize),

    /// Terminal failure of a single operation.
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl From<rmp_serde::decode::Error> for BridgeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BridgeError::MalformedPayload(e.to_string())
    }
}

/// Terminal error for one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The connection went away before the operation finished.
    #[error("Disconnected")]
    Disconnected,

    /// The peer reported a failure for this operation.
    #[error("Peer error ({code}): {message}")]
    Peer { message: String, code: i32 },

    /// Events for this origin arrived out of order.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The callback could not accept an event; the operation was retired.
    #[error("Callback delivery failed: {0}")]
    CallbackDeliveryFailed(String),

    /// The request frame could not be written.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The operation was removed from the registry without a terminal event.
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
