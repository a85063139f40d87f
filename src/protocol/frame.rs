//! Frame struct and whole-message encode/decode.
//!
//! A [`Frame`] is one complete length-delimited payload, already stripped of
//! its prefix. The helpers here go all the way from a [`Message`] to wire
//! bytes and back.
//!
//! # Example
//!
//! ```
//! use privbridge::protocol::{decode_frame, encode_frame, Message, Payload};
//!
//! let message = Message::new("r1", Payload::Complete);
//! let bytes = encode_frame(&message).unwrap();
//! let (decoded, used) = decode_frame(&bytes).unwrap();
//!
//! assert_eq!(decoded, message);
//! assert_eq!(used, bytes.len());
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::message::Message;
use super::wire_format::{
    decode_length, encode_length, validate_length, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
use crate::codec::MsgPackCodec;
use crate::error::{BridgeError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from its payload.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Parse the payload as a [`Message`].
    ///
    /// Fails with `MalformedPayload` if the bytes are not a valid message.
    pub fn decode(&self) -> Result<Message> {
        MsgPackCodec::decode(&self.payload)
    }
}

/// Encode a message as prefix plus payload, with the default size limit.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    encode_frame_with_limit(message, DEFAULT_MAX_FRAME_SIZE)
}

/// Encode a message as prefix plus payload.
///
/// Fails with `FrameTooLarge` if the serialized message exceeds `max`.
pub fn encode_frame_with_limit(message: &Message, max: usize) -> Result<Vec<u8>> {
    let (prefix, payload) = encode_frame_parts(message, max)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encode a message into separate prefix and payload for vectored writes.
pub fn encode_frame_parts(message: &Message, max: usize) -> Result<([u8; HEADER_SIZE], Bytes)> {
    let payload = MsgPackCodec::encode(message)?;
    let prefix = encode_length(payload.len(), max)?;
    Ok((prefix, Bytes::from(payload)))
}

/// Decode one message from the front of `buf`.
///
/// Returns the message and the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize)> {
    decode_frame_with_limit(buf, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode one message from the front of `buf` with a custom size limit.
pub fn decode_frame_with_limit(buf: &[u8], max: usize) -> Result<(Message, usize)> {
    let length = decode_length(buf).ok_or(BridgeError::TruncatedFrame {
        expected: HEADER_SIZE,
        actual: buf.len(),
    })?;
    validate_length(length, max)?;

    let body = &buf[HEADER_SIZE..];
    if body.len() < length {
        return Err(BridgeError::TruncatedFrame {
            expected: length,
            actual: body.len(),
        });
    }

    let message = MsgPackCodec::decode(&body[..length])?;
    Ok((message, HEADER_SIZE + length))
}

/// Read exactly one message from an async byte stream.
///
/// The payload is never allocated before its length has been validated.
/// A stream that ends mid-frame yields `TruncatedFrame`.
pub async fn read_message<R>(reader: &mut R, max: usize) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut prefix).await?;
    if got < HEADER_SIZE {
        return Err(BridgeError::TruncatedFrame {
            expected: HEADER_SIZE,
            actual: got,
        });
    }

    let length = u32::from_le_bytes(prefix) as usize;
    validate_length(length, max)?;

    let mut payload = vec![0u8; length];
    let got = read_full(reader, &mut payload).await?;
    if got < length {
        return Err(BridgeError::TruncatedFrame {
            expected: length,
            actual: got,
        });
    }

    MsgPackCodec::decode(&payload)
}

/// Fill `buf` until it is full or the stream ends; returns bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
