//! Protocol engine adapter.
//!
//! The narrow contract the driver needs from the cryptographic protocol engine.
//! This is the only point of contact with actual cryptography: the driver never
//! inspects record contents, it only moves bytes between buffers and reacts to
//! the [`EngineStatus`] / [`HandshakeStatus`] pair each call reports.

use crate::error::EngineError;

/// Outcome class of a single `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    /// The call completed; inspect the byte counts and handshake status
    Ok,
    /// The direction is finished (close-notify sent or received)
    Closed,
    /// The destination could not hold the output
    BufferOverflow,
    /// The source did not hold a complete input unit
    BufferUnderflow,
}

/// What the engine needs next to advance its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStatus {
    /// No handshake in progress
    NotHandshaking,
    /// The call that returned this just completed the handshake
    Finished,
    /// CPU-bound work must run via [`ProtocolEngine::run_delegated_task`]
    NeedTask,
    /// The engine must produce output before it can go on
    NeedWrap,
    /// The engine must consume input before it can go on
    NeedUnwrap,
}

impl HandshakeStatus {
    /// Check if a handshake step is still outstanding
    #[must_use]
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::NeedTask | Self::NeedWrap | Self::NeedUnwrap)
    }
}

/// Result of a `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// Outcome class
    pub status: EngineStatus,
    /// Handshake status after the call
    pub handshake: HandshakeStatus,
    /// Bytes taken from the source
    pub consumed: usize,
    /// Bytes written to the destination
    pub produced: usize,
}

impl EngineResult {
    /// Construct a result
    #[must_use]
    pub const fn new(
        status: EngineStatus,
        handshake: HandshakeStatus,
        consumed: usize,
        produced: usize,
    ) -> Self {
        Self {
            status,
            handshake,
            consumed,
            produced,
        }
    }

    /// Check if the call moved any bytes
    #[must_use]
    pub fn made_progress(&self) -> bool {
        self.consumed > 0 || self.produced > 0
    }
}

/// Session parameters negotiated (or assumed) by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Protocol name and version
    pub protocol: String,
    /// Record protection suite
    pub cipher_suite: String,
    /// Largest single unit of ciphertext; sizes the receive and send buffers
    pub packet_buffer_size: usize,
    /// Largest single unit of plaintext; sizes the decrypted-read buffer
    pub application_buffer_size: usize,
}

/// Cryptographic protocol engine driven by the channel.
///
/// Engines are not required to be thread safe: the channel serializes every
/// call under its lock.
///
/// # Buffer contract
///
/// - `wrap` reads plaintext from `srcs` in order and appends at most one unit
///   of output to `dst`. It may produce output with nothing consumed (handshake
///   messages, close-notify).
/// - `unwrap` reads at most one unit of input from the front of `src` and
///   writes plaintext into `dsts` in order, filling each slice before moving to
///   the next.
/// - [`EngineStatus::BufferOverflow`] and [`EngineStatus::BufferUnderflow`]
///   report no bytes moved.
pub trait ProtocolEngine: Send + 'static {
    /// Transform plaintext (and/or pending handshake state) into ciphertext
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` if the engine cannot produce output.
    fn wrap(&mut self, srcs: &[&[u8]], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Transform one unit of ciphertext into plaintext and/or handshake progress
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` for malformed, unauthentic or unexpected input.
    fn unwrap(&mut self, src: &[u8], dsts: &mut [&mut [u8]])
    -> Result<EngineResult, EngineError>;

    /// Run one unit of CPU-bound handshake work.
    ///
    /// Must complete before the next `wrap` or `unwrap`.
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` if the work fails (for example key agreement
    /// against an invalid peer key).
    fn run_delegated_task(&mut self) -> Result<(), EngineError>;

    /// Current handshake status without performing I/O
    fn handshake_status(&self) -> HandshakeStatus;

    /// Start (or restart) the handshake
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` if the engine cannot start a handshake now.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Signal that no more inbound data will be accepted.
    ///
    /// # Errors
    ///
    /// Fails if the peer did not close cleanly (no close-notify received), so
    /// callers can tell truncation apart from an orderly shutdown.
    fn close_inbound(&mut self) -> Result<(), EngineError>;

    /// Signal that no more application data will be sent; subsequent wraps
    /// emit a closure notification.
    fn close_outbound(&mut self);

    /// Check if the inbound direction is finished
    fn is_inbound_done(&self) -> bool;

    /// Check if the outbound direction is finished
    fn is_outbound_done(&self) -> bool;

    /// Session parameters, including buffer sizing hints
    fn session(&self) -> SessionInfo;

    /// Required size of a ciphertext buffer
    fn required_ciphertext_buffer_size(&self) -> usize {
        self.session().packet_buffer_size
    }

    /// Required size of a plaintext buffer
    fn required_plaintext_buffer_size(&self) -> usize {
        self.session().application_buffer_size
    }
}
