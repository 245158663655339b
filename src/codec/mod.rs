//! Codec module - serialization/deserialization for frame payloads.
//!
//! Every frame payload is one MessagePack document. The protocol itself is
//! agnostic to the serializer as long as both peers agree on one that is
//! self-delimiting and lossless for the nil/bool/int/float/str/bin/array/
//! map grammar; this crate pins MessagePack via [`MsgPackCodec`].

mod msgpack;

pub use msgpack::MsgPackCodec;
