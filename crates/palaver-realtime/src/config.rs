//! Session layer tunables.

use std::time::Duration;

/// Configuration for the realtime session layer.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// How long an unanswered call rings before it ends with reason
    /// `timeout`.
    pub ring_timeout: Duration,
    /// Capacity of each connection's outbound event queue. A connection
    /// whose queue overflows is torn down rather than allowed to stall
    /// the pipeline.
    pub outbound_queue_capacity: usize,
    /// Capacity of the presence transition broadcast channel.
    pub presence_channel_capacity: usize,
}

impl RealtimeConfig {
    pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
    pub const DEFAULT_PRESENCE_CHANNEL_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_presence_channel_capacity(mut self, capacity: usize) -> Self {
        self.presence_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Self::DEFAULT_RING_TIMEOUT,
            outbound_queue_capacity: Self::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            presence_channel_capacity: Self::DEFAULT_PRESENCE_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = RealtimeConfig::default();
        assert_eq!(config.ring_timeout, Duration::from_secs(30));
        assert_eq!(config.outbound_queue_capacity, 256);
    }

    #[test]
    fn capacities_are_clamped_to_at_least_one() {
        let config = RealtimeConfig::default().with_outbound_queue_capacity(0);
        assert_eq!(config.outbound_queue_capacity, 1);
    }
}
