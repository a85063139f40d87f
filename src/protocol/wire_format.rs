//! Wire format encoding and decoding.
//!
//! Every frame is a length prefix followed by the payload:
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ Length       │ Payload                  │
//! │ 4 bytes      │ `Length` bytes           │
//! │ uint32 LE    │ MsgPack-encoded Message  │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! The prefix is Little Endian.

use crate::error::{BridgeError, Result};

/// Length prefix size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (8 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Absolute maximum payload size representable by the prefix.
pub const ABSOLUTE_MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// Encode a payload length into a 4-byte prefix.
///
/// Fails with `FrameTooLarge` if `len` exceeds `max`.
#[inline]
pub fn encode_length(len: usize, max: usize) -> Result<[u8; HEADER_SIZE]> {
    if len > max.min(ABSOLUTE_MAX_FRAME_SIZE) {
        return Err(BridgeError::FrameTooLarge { size: len, max });
    }
    Ok((len as u32).to_le_bytes())
}

/// Decode a 4-byte prefix.
///
/// Returns `None` if fewer than 4 bytes are available.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<usize> {
    let prefix: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}

/// Validate a decoded length against the configured maximum.
#[inline]
pub fn validate_length(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(BridgeError::FrameTooLarge { size: len, max });
    }
    Ok(())
}
