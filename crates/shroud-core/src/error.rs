//! Error types for the SHROUD record layer.

use crate::buffer::BufferKind;
use crate::engine::{EngineStatus, HandshakeStatus};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Channel errors
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure, propagated unchanged
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The protocol engine returned a result the driver cannot act on
    #[error("protocol engine misbehaved: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Error raised by the protocol engine itself
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Write attempted after the outbound direction finished
    #[error("channel is closed")]
    Closed,

    /// A blocking wait was interrupted
    #[error("interrupted while waiting for readiness")]
    Interrupted,

    /// Both halves of close failed
    #[error("multiple failures on close, transport close failed: {transport}")]
    CloseFailed {
        /// Transport close failure (primary)
        transport: io::Error,
        /// Inbound closure failure (attached cause)
        #[source]
        inbound: EngineError,
    },
}

impl Error {
    /// Check if the engine raised this error. A read that fails this way at
    /// end of stream means the peer never sent its closure notification.
    #[must_use]
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Interrupted => io::Error::new(io::ErrorKind::Interrupted, err),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Engine result combinations the driver refuses to guess a recovery for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Engine asked for a bigger buffer than the one it already said was enough
    #[error("{buffer} buffer too small: capacity {capacity} already meets required {required}")]
    BufferTooSmall {
        /// Which buffer was involved
        buffer: BufferKind,
        /// Current capacity
        capacity: usize,
        /// Size the engine advertised
        required: usize,
    },

    /// Status/handshake-status pairing the driver does not recognize as reachable
    #[error("unexpected {operation} result: status {status:?}, handshake {handshake:?}")]
    UnexpectedResult {
        /// Engine operation
        operation: Operation,
        /// Returned status
        status: EngineStatus,
        /// Returned handshake status
        handshake: HandshakeStatus,
    },
}

/// Engine operation named in a [`ProtocolViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `wrap`
    Wrap,
    /// `unwrap`
    Unwrap,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrap => f.write_str("wrap"),
            Self::Unwrap => f.write_str("unwrap"),
        }
    }
}

/// Opaque error reported by a [`ProtocolEngine`](crate::ProtocolEngine).
///
/// Engines keep their own error types; this carries them across the adapter
/// boundary without the core having to know about them.
#[derive(Debug)]
pub struct EngineError(Box<dyn std::error::Error + Send + Sync>);

impl EngineError {
    /// Wrap an engine-specific error
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(err.into())
    }

    /// Build from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    /// Borrow the engine-specific error
    #[must_use]
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}
