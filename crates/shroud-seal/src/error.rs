//! Seal engine error types.

use shroud_core::EngineError;
use thiserror::Error;

/// Seal engine errors
#[derive(Debug, Error)]
pub enum SealError {
    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record header or body could not be decoded
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Unknown content type byte
    #[error("unknown content type: {0}")]
    UnknownContentType(u8),

    /// Record body longer than the negotiated maximum
    #[error("record too large: {length} bytes (max {max})")]
    RecordTooLarge {
        /// Declared body length
        length: usize,
        /// Largest acceptable body length
        max: usize,
    },

    /// A record arrived that the current handshake phase does not accept
    #[error("unexpected {content} record while {phase}")]
    UnexpectedRecord {
        /// Content type of the offending record
        content: &'static str,
        /// Handshake phase at the time
        phase: &'static str,
    },

    /// Peer key agreement produced a non-contributory secret
    #[error("invalid public key")]
    InvalidPublicKey,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Finished MAC did not match the transcript
    #[error("finished verification failed")]
    FinishedMismatch,

    /// Record counter exhausted
    #[error("nonce counter exhausted")]
    NonceOverflow,

    /// Peer sent a fatal alert
    #[error("peer sent fatal alert {0}")]
    PeerAlert(u8),

    /// Inbound closed without a closure notification
    #[error("inbound closed before close_notify: possible truncation")]
    Truncated,

    /// A second handshake was requested on an established session
    #[error("renegotiation is not supported")]
    Renegotiation,
}

impl From<SealError> for EngineError {
    fn from(err: SealError) -> Self {
        EngineError::new(err)
    }
}
