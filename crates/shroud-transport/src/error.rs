//! Transport errors.

/// Transport setup errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport setup
pub type TransportResult<T> = Result<T, TransportError>;
