//! Channel sizing for session internals

use serde::{Deserialize, Serialize};

/// Buffer sizes for the channels a session owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Completion queue (in-flight requests -> session driver)
    pub completion_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            completion_buffer: 1024,
        }
    }
}

impl ChannelConfig {
    /// Set the completion queue size (minimum 1)
    pub fn with_completion_buffer(mut self, size: usize) -> Self {
        self.completion_buffer = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.completion_buffer, 1024);
    }

    #[test]
    fn test_channel_config_builder_floors_at_one() {
        let config = ChannelConfig::default().with_completion_buffer(0);
        assert_eq!(config.completion_buffer, 1);
    }
}
