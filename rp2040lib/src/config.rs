use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{HEADER_LEN, MAX_PAYLOAD};
use crate::{Error, Result};

/// Tuning for a controller link.
///
/// All durations are in milliseconds so the struct reads naturally out of a
/// TOML `[link]` table. Missing keys fall back to [LinkConfig::default].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// How long the scheduler waits for an explicit command before it
    /// polls with `GET_STATE`.
    pub command_wait_ms: u64,
    /// Upper bound on a single command frame write.
    pub write_timeout_ms: u64,
    /// Upper bound on waiting for the response to a command.
    pub response_timeout_ms: u64,
    /// Largest payload length accepted in an inbound header.
    pub max_payload: usize,
    /// Consecutive bad frames before a persistent desync is reported.
    pub bad_packet_threshold: u32,
    /// Capacity of the verified-frame queue.
    pub queue_capacity: usize,
    /// Capacity of the inbound accumulator, in bytes.
    pub accumulator_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_wait_ms: 10,
            write_timeout_ms: 10_000,
            response_timeout_ms: 10_000,
            max_payload: MAX_PAYLOAD,
            bad_packet_threshold: 5,
            queue_capacity: 256,
            accumulator_capacity: 512 * 128 + 8,
        }
    }
}

impl LinkConfig {
    pub fn command_wait(&self) -> Duration {
        Duration::from_millis(self.command_wait_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Check that the values can work together.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload > u16::MAX as usize {
            return Err(Error::Config(format!(
                "max_payload {} does not fit the 16-bit length field",
                self.max_payload
            )));
        }
        // a maximal frame has to fit, or it could never be assembled
        let largest_frame = HEADER_LEN + self.max_payload + 1;
        if self.accumulator_capacity < largest_frame {
            return Err(Error::Config(format!(
                "accumulator_capacity {} is smaller than the largest frame ({} bytes)",
                self.accumulator_capacity, largest_frame
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.bad_packet_threshold == 0 {
            return Err(Error::Config(
                "bad_packet_threshold must be at least 1".into(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(Error::Config(
                "response_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(LinkConfig::default().validate().is_ok());
    }

    #[test]
    fn default_timings() {
        let config = LinkConfig::default();
        assert_eq!(config.command_wait(), Duration::from_millis(10));
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.max_payload, 2048);
    }

    #[test]
    fn accumulator_must_hold_a_frame() {
        let config = LinkConfig {
            accumulator_capacity: 100,
            ..LinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_queue_rejected() {
        let config = LinkConfig {
            queue_capacity: 0,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
