//! Codec module - serialization of bridge messages.
//!
//! [`MsgPackCodec`] turns a [`Message`](crate::protocol::Message) into frame
//! payload bytes and back. Framing itself lives in [`protocol`](crate::protocol).
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is fixed at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
