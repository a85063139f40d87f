//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named`, as maps keyed by field name,
//! because the privileged peer decodes messages by field name.
//!
//! # Example
//!
//! ```
//! use privbridge::codec::MsgPackCodec;
//! use privbridge::protocol::{Message, Payload};
//!
//! let msg = Message::new("r1", Payload::Complete);
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so struct fields travel as map keys.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // Field names on the wire; the peer decodes by name
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if the bytes cannot be deserialized to `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
