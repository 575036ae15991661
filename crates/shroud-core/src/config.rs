//! Channel configuration

use serde::{Deserialize, Serialize};

/// Channel configuration
///
/// Buffers grow on demand to whatever the engine asks for, so the default of
/// zero for every capacity is fine; presizing only saves the first growth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Initial receive (ciphertext in) buffer capacity
    pub receive_capacity: usize,
    /// Initial send (ciphertext out) buffer capacity
    pub send_capacity: usize,
    /// Initial decrypted-read buffer capacity
    pub read_capacity: usize,
    /// Name recorded on the channel's tracing events
    pub label: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_capacity: 0,
            send_capacity: 0,
            read_capacity: 0,
            label: String::from("channel"),
        }
    }
}

impl ChannelConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial receive buffer capacity
    #[must_use]
    pub fn with_receive_capacity(mut self, capacity: usize) -> Self {
        self.receive_capacity = capacity;
        self
    }

    /// Set the initial send buffer capacity
    #[must_use]
    pub fn with_send_capacity(mut self, capacity: usize) -> Self {
        self.send_capacity = capacity;
        self
    }

    /// Set the initial decrypted-read buffer capacity
    #[must_use]
    pub fn with_read_capacity(mut self, capacity: usize) -> Self {
        self.read_capacity = capacity;
        self
    }

    /// Set the tracing label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_lazy() {
        let config = ChannelConfig::default();
        assert_eq!(config.receive_capacity, 0);
        assert_eq!(config.send_capacity, 0);
        assert_eq!(config.read_capacity, 0);
        assert_eq!(config.label, "channel");
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::new()
            .with_receive_capacity(1024)
            .with_send_capacity(2048)
            .with_read_capacity(512)
            .with_label("edge-1");
        assert_eq!(config.receive_capacity, 1024);
        assert_eq!(config.send_capacity, 2048);
        assert_eq!(config.read_capacity, 512);
        assert_eq!(config.label, "edge-1");
    }
}
