//! Error types for agentwire.

use std::fmt;

use thiserror::Error;

use crate::value::{Value, ValueMap};

/// Main error type for all mesh operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MessagePack serialization error.
    #[error("MsgPack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization error.
    #[error("MsgPack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The peer sent something the protocol forbids.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Declared frame length exceeds the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Operation requires a bound transport.
    #[error("Not connected")]
    NotConnected,

    /// The transport is gone.
    #[error("Disconnected")]
    Disconnected,

    /// The handshake did not complete within the connection timeout.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// Every 32-bit callback key is occupied.
    #[error("Ran out of keys")]
    KeySpaceExhausted,
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

/// Classification of faults surfaced through events and callback flushes.
///
/// Only [`FaultKind::Disconnect`] and [`FaultKind::NotConnected`] cross into
/// application callbacks; the other kinds describe local event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Terminal transport loss.
    Disconnect,
    /// A proxy was invoked without a live connection.
    NotConnected,
    /// The peer violated the message protocol.
    Protocol,
    /// A frame payload failed to deserialize.
    BadPayload,
}

impl FaultKind {
    /// Stable error code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            FaultKind::Disconnect => "EDISCONNECT",
            FaultKind::NotConnected => "ENOTCONNECTED",
            FaultKind::Protocol => "EPROTOCOL",
            FaultKind::BadPayload => "EBADPAYLOAD",
        }
    }
}

/// A cloneable fault carried by peer/transport events and delivered to
/// flushed callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Human-readable detail.
    pub message: String,
}

impl Fault {
    /// Create a new fault.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Terminal transport-loss fault.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Disconnect, message)
    }

    /// Fault for a proxy invoked without a live connection.
    pub fn not_connected() -> Self {
        Self::new(FaultKind::NotConnected, "Not connected")
    }

    /// Stable error code (`EDISCONNECT`, `ENOTCONNECTED`, ...).
    #[inline]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Render this fault as the `{code, message}` map delivered to
    /// application callbacks.
    pub fn to_value(&self) -> Value {
        let map = ValueMap::new();
        map.insert("code", Value::from(self.code()));
        map.insert("message", Value::from(self.message.clone()));
        Value::Map(map)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}
