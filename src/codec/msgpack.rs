//! MessagePack codec for frame payloads.
//!
//! Every frame body is one MessagePack document. The protocol only asks
//! for a self-delimiting, lossless encoding of the
//! nil/bool/int/float/str/bin/array/map grammar that both peers agree on;
//! this crate pins MessagePack via `rmp-serde`.
//!
//! Encoding goes through `to_vec_named`, so serde structs appear on the
//! wire as maps keyed by field name instead of positional arrays. A peer
//! that has never seen the Rust type can still read the document, and it
//! is the map form that [`WireValue`](crate::wire::WireValue) produces
//! and expects when a message comes back in.
//!
//! # Example
//!
//! ```
//! use agentwire::codec::MsgPackCodec;
//! use agentwire::wire::WireValue;
//!
//! let value = WireValue::Str("hello".to_owned());
//! let encoded = MsgPackCodec::encode(&value).unwrap();
//! let decoded: WireValue = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, value);
//! ```

use crate::error::Result;

/// Stateless encoder/decoder between serde values and MessagePack bytes.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Serialize `value` into a MessagePack byte vector, struct-as-map.
    ///
    /// # Errors
    ///
    /// Fails when `value` has no MessagePack representation.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Parse a MessagePack document into a `T`.
    ///
    /// # Errors
    ///
    /// Fails on malformed input, or when the document does not fit `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
