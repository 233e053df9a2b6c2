//! Channel configuration for scheduler communication

use crate::config::ConfigError;

/// Channel buffer configuration between users and the event consumer
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Event channel buffer size (users -> aggregator)
    ///
    /// Users wait on a full buffer, so a slow consumer throttles the run
    /// rather than growing memory.
    pub events_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            events_buffer: 10_000,
        }
    }
}

impl ChannelConfig {
    /// Create a new channel config with a custom event buffer size
    pub fn with_events_buffer(mut self, size: usize) -> Self {
        self.events_buffer = size.max(1);
        self
    }

    /// Reject sizes a bounded channel cannot be built with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events_buffer == 0 {
            return Err(ConfigError::InvalidChannel(
                "events_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
