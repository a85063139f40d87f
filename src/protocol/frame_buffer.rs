//! Incremental frame reassembly for the reader loop.
//!
//! Socket reads land on arbitrary byte boundaries. [`FrameBuffer`] keeps the
//! leftovers in a `BytesMut` and walks two states:
//! - `AwaitingPrefix`: fewer than 4 bytes of the next length are known
//! - `AwaitingPayload`: length known, collecting that many payload bytes
//!
//! # Example
//!
//! ```
//! use privbridge::protocol::{encode_frame, FrameBuffer, Message, Payload};
//!
//! let bytes = encode_frame(&Message::new("r1", Payload::Complete)).unwrap();
//! let mut buffer = FrameBuffer::with_capacity_and_max_frame_size(64, 1024);
//!
//! buffer.extend(&bytes[..3]);
//! assert!(buffer.next_frame().unwrap().is_none());
//!
//! buffer.extend(&bytes[3..]);
//! let frame = buffer.next_frame().unwrap().unwrap();
//! assert_eq!(frame.decode().unwrap().origin, "r1");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{decode_length, validate_length, HEADER_SIZE};
use super::Frame;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingPrefix,
    AwaitingPayload { length: usize },
}

/// Reassembles length-prefixed frames from a byte stream.
///
/// The maximum frame size is checked as soon as a prefix is complete, so an
/// oversized frame is refused before any of its payload is held.
pub struct FrameBuffer {
    pending: BytesMut,
    state: State,
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Buffer with room for `capacity` bytes, accepting frames up to `max_frame_size`.
    pub fn with_capacity_and_max_frame_size(capacity: usize, max_frame_size: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(capacity),
            state: State::AwaitingPrefix,
            max_frame_size,
        }
    }

    /// Feed `data` without parsing.
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::AwaitingPrefix => {
                    let Some(length) = decode_length(&self.pending) else {
                        return Ok(None);
                    };
                    validate_length(length, self.max_frame_size)?;

                    self.pending.advance(HEADER_SIZE);
                    self.state = State::AwaitingPayload { length };
                    self.pending
                        .reserve(length.saturating_sub(self.pending.len()));
                }
                State::AwaitingPayload { length } => {
                    if self.pending.len() < length {
                        return Ok(None);
                    }
                    let payload = self.pending.split_to(length).freeze();
                    self.state = State::AwaitingPrefix;
                    return Ok(Some(Frame::new(payload)));
                }
            }
        }
    }

    /// End of input. A partially received frame is a `TruncatedFrame`.
    pub fn finish(&self) -> Result<()> {
        let expected = match self.state {
            State::AwaitingPrefix if self.pending.is_empty() => return Ok(()),
            State::AwaitingPrefix => HEADER_SIZE,
            State::AwaitingPayload { length } => length,
        };
        Err(BridgeError::TruncatedFrame {
            expected,
            actual: self.pending.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, Headers, Message, Payload, DEFAULT_MAX_FRAME_SIZE};

    fn wire(origin: &str, payload: Payload) -> Vec<u8> {
        encode_frame(&Message::new(origin, payload)).unwrap()
    }

    fn buffer() -> FrameBuffer {
        FrameBuffer::with_capacity_and_max_frame_size(64, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Feed one read and collect what it completes, the way the reader loop does.
    fn feed(buffer: &mut FrameBuffer, data: &[u8]) -> Result<Vec<Frame>> {
        buffer.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = buffer.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn origins(frames: &[Frame]) -> Vec<String> {
        frames.iter().map(|f| f.decode().unwrap().origin).collect()
    }

    #[test]
    fn test_back_to_back_frames_in_one_read() {
        let mut bytes = wire("a", Payload::Complete);
        bytes.extend(wire(
            "b",
            Payload::Headers {
                status: 200,
                headers: Headers::new(),
            },
        ));
        bytes.extend(wire("c", Payload::Complete));

        let mut buffer = buffer();
        let frames = feed(&mut buffer, &bytes).unwrap();

        assert_eq!(origins(&frames), vec!["a", "b", "c"]);
        assert!(buffer.pending.is_empty());
        assert!(buffer.finish().is_ok());
    }

    #[test]
    fn test_split_inside_prefix_and_payload() {
        let bytes = wire(
            "r1",
            Payload::Error {
                message: "a message long enough to split across reads".into(),
                code: 500,
            },
        );
        let mut buffer = buffer();

        assert!(feed(&mut buffer, &bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state, State::AwaitingPrefix);

        assert!(feed(&mut buffer, &bytes[2..HEADER_SIZE + 5]).unwrap().is_empty());
        assert!(matches!(buffer.state, State::AwaitingPayload { .. }));

        let frames = feed(&mut buffer, &bytes[HEADER_SIZE + 5..]).unwrap();
        assert_eq!(origins(&frames), vec!["r1"]);
        assert_eq!(buffer.state, State::AwaitingPrefix);
    }

    #[test]
    fn test_one_byte_reads() {
        let bytes = wire("slow", Payload::Complete);
        let mut buffer = buffer();

        let mut frames = Vec::new();
        for byte in &bytes {
            frames.extend(feed(&mut buffer, std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(origins(&frames), vec!["slow"]);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut buffer = buffer();
        let frames = feed(&mut buffer, &0u32.to_le_bytes()).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
    }

    #[test]
    fn test_oversize_refused_from_prefix_alone() {
        let mut buffer = FrameBuffer::with_capacity_and_max_frame_size(16, 100);

        assert!(matches!(
            feed(&mut buffer, &1000u32.to_le_bytes()),
            Err(BridgeError::FrameTooLarge {
                size: 1000,
                max: 100
            })
        ));
    }

    #[test]
    fn test_next_frame_keeps_frames_before_oversize() {
        let mut buffer = FrameBuffer::with_capacity_and_max_frame_size(16, 64);
        let mut data = wire("ok", Payload::Complete);
        data.extend(1000u32.to_le_bytes());
        buffer.extend(&data);

        let first = buffer.next_frame().unwrap().unwrap();
        assert_eq!(first.decode().unwrap().origin, "ok");
        assert!(buffer.next_frame().is_err());
    }

    #[test]
    fn test_finish_mid_payload() {
        let mut buffer = buffer();
        assert!(buffer.finish().is_ok());

        let mut partial = 9u32.to_le_bytes().to_vec();
        partial.extend_from_slice(b"abc");
        feed(&mut buffer, &partial).unwrap();

        match buffer.finish() {
            Err(BridgeError::TruncatedFrame { expected, actual }) => {
                assert_eq!(expected, 9);
                assert_eq!(actual, 3);
            }
            other => panic!("expected TruncatedFrame, got {:?}", other),
        }
    }

    #[test]
    fn test_finish_mid_prefix() {
        let mut buffer = buffer();
        feed(&mut buffer, &[7, 0]).unwrap();

        assert!(matches!(
            buffer.finish(),
            Err(BridgeError::TruncatedFrame {
                expected: 4,
                actual: 2
            })
        ));
    }
}
