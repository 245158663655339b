//! Incremental length-prefix framer.
//!
//! The [`Framer`] is a pure state machine with no I/O policy of its own:
//! feed it byte chunks of any size and it hands back every frame those
//! bytes complete, in order. A single frame may span arbitrarily many
//! chunks and a single chunk may complete arbitrarily many frames.
//!
//! ```text
//! ┌───────────────┬──────────────────┐
//! │ Length (4B BE)│ Payload (N bytes)│
//! └───────────────┴──────────────────┘
//! ```
//!
//! Truncated input is not an error here - the framer simply waits for more
//! bytes; the transport layer decides what EOF means.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default maximum frame length (1 GiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1_073_741_824;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Accumulating the big-endian length word; `got` prefix bytes so far.
    Length { got: u8 },
    /// Length known, accumulating payload bytes.
    Payload,
}

/// Incremental decoder from byte chunks to frame payloads.
pub struct Framer {
    state: State,
    length: u32,
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Framer {
    /// Create a framer with the default maximum frame length.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a framer with a custom maximum frame length.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            state: State::Length { got: 0 },
            length: 0,
            buffer: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Feed a chunk of bytes and collect every frame it completes.
    ///
    /// Returns the completed payloads in wire order; the vector is empty
    /// while a frame is still accumulating.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FrameTooLarge`] when a declared length exceeds
    /// the configured maximum. The stream cannot be resynchronized after
    /// that; callers must drop the connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            match self.state {
                State::Length { got } => {
                    // shift the next length byte in, MSB first
                    self.length = (self.length << 8) | u32::from(rest[0]);
                    rest = &rest[1..];

                    if got < 3 {
                        self.state = State::Length { got: got + 1 };
                        continue;
                    }

                    let length = self.length as usize;
                    if length > self.max_frame_len {
                        return Err(WireError::FrameTooLarge {
                            size: length,
                            max: self.max_frame_len,
                        });
                    }

                    if length == 0 {
                        frames.push(Bytes::new());
                        self.reset();
                    } else {
                        self.buffer.reserve(length);
                        self.state = State::Payload;
                    }
                }

                State::Payload => {
                    let need = self.length as usize - self.buffer.len();
                    let take = need.min(rest.len());
                    self.buffer.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];

                    if self.buffer.len() == self.length as usize {
                        frames.push(self.buffer.split().freeze());
                        self.reset();
                    }
                }
            }
        }

        Ok(frames)
    }

    /// Number of payload bytes buffered for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the framer sits at a frame boundary.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Length { got: 0 })
    }

    fn reset(&mut self) {
        self.state = State::Length { got: 0 };
        self.length = 0;
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the 4-byte big-endian length prefix for a payload.
///
/// # Errors
///
/// Returns [`WireError::FrameTooLarge`] if the payload does not fit in a
/// 32-bit length.
pub fn frame_header(payload_len: usize) -> Result<[u8; LEN_PREFIX_SIZE]> {
    let length = u32::try_from(payload_len).map_err(|_| WireError::FrameTooLarge {
        size: payload_len,
        max: u32::MAX as usize,
    })?;
    Ok(length.to_be_bytes())
}

/// Encode a whole frame into one contiguous buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let header = frame_header(payload.len())?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}
