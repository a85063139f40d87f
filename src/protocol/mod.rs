//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the bridge wire protocol:
//! - 4-byte little-endian length prefix
//! - Frame buffer for accumulating partial reads
//! - Tagged [`Message`] carried in each frame

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{
    decode_frame, decode_frame_with_limit, encode_frame, encode_frame_parts,
    encode_frame_with_limit, read_message, Frame,
};
pub use frame_buffer::FrameBuffer;
pub use message::{Headers, Message, MessageKind, Payload, NORMAL_CLOSURE};
pub use wire_format::{
    decode_length, encode_length, validate_length, ABSOLUTE_MAX_FRAME_SIZE,
    DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
