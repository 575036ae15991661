//! Seal engine configuration

use crate::error::SealError;
use crate::record::{HEADER_SIZE, MAX_FRAGMENT, MAX_HANDSHAKE_BODY};
use crate::TAG_SIZE;
use serde::{Deserialize, Serialize};

/// Which side of the handshake an engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Sends the first hello
    Client,
    /// Answers the client's hello
    Server,
}

/// Seal engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Handshake role
    pub role: Role,
    /// Largest plaintext fragment per application record
    pub max_fragment: usize,
    /// Treat inbound closure without a close_notify as truncation
    pub require_close_notify: bool,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            max_fragment: MAX_FRAGMENT,
            require_close_notify: true,
        }
    }
}

impl SealConfig {
    /// Default client configuration
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Default server configuration
    #[must_use]
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Self::default()
        }
    }

    /// Set the largest plaintext fragment
    #[must_use]
    pub fn with_max_fragment(mut self, max_fragment: usize) -> Self {
        self.max_fragment = max_fragment;
        self
    }

    /// Set whether a missing close_notify is treated as truncation
    #[must_use]
    pub fn with_require_close_notify(mut self, require: bool) -> Self {
        self.require_close_notify = require;
        self
    }

    /// Largest record body accepted from the peer.
    ///
    /// Never smaller than a protected finished message, so the handshake
    /// completes whatever the fragment size.
    #[must_use]
    pub fn max_body(&self) -> usize {
        self.max_fragment.max(MAX_HANDSHAKE_BODY) + TAG_SIZE
    }

    /// Largest record on the wire
    #[must_use]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.max_body()
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `SealError::InvalidConfig` if `max_fragment` is zero or larger
    /// than [`MAX_FRAGMENT`].
    pub fn validate(&self) -> Result<(), SealError> {
        if self.max_fragment == 0 {
            return Err(SealError::InvalidConfig(
                "max_fragment must be greater than 0".into(),
            ));
        }
        if self.max_fragment > MAX_FRAGMENT {
            return Err(SealError::InvalidConfig(format!(
                "max_fragment must be at most {MAX_FRAGMENT}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SealConfig::default();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.max_fragment, 16384);
        assert!(config.require_close_notify);
        assert_eq!(config.packet_size(), 3 + 16384 + 16);
        assert_eq!(SealConfig::server().role, Role::Server);
    }

    #[test]
    fn test_small_fragment_keeps_handshake_room() {
        let config = SealConfig::client().with_max_fragment(1);
        assert_eq!(config.max_body(), 33 + 16);
        assert_eq!(config.packet_size(), 3 + 33 + 16);

        let config = SealConfig::client().with_max_fragment(64);
        assert_eq!(config.max_body(), 64 + 16);
    }

    #[test]
    fn test_config_validation() {
        assert!(SealConfig::client().validate().is_ok());
        assert!(SealConfig::client().with_max_fragment(1).validate().is_ok());
        assert!(SealConfig::client().with_max_fragment(0).validate().is_err());
        assert!(
            SealConfig::client()
                .with_max_fragment(MAX_FRAGMENT + 1)
                .validate()
                .is_err()
        );
    }
}
