//! Protocol module - length-prefix framing between bytes and payloads.
//!
//! Every frame on the wire is a 4-byte big-endian unsigned length followed
//! by exactly that many payload bytes. Payloads are opaque at this layer.

mod framer;

pub use framer::{
    encode_frame, frame_header, Framer, DEFAULT_MAX_FRAME_LEN, LEN_PREFIX_SIZE,
};
