//! Session configuration.
//!
//! Defaults match the monitor firmware; a JSON file can override any field
//! and the CLI overrides the file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{HrvError, Result};
use crate::protocol::{BAUD_RATE, DEFAULT_LINE_TIMEOUT};

/// Bound for each underlying read; also how fast a close takes effect.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra wait added to the nominal simulation length before polling for its end.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Nominal time the device needs to replay a simulated trace.
const DEFAULT_SIMULATION_DURATION: Duration = Duration::from_secs(10);

/// Longest silence tolerated while a dump or live phase is being framed.
const DEFAULT_PHASE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for the single-line answer to a metric command.
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Timed-out attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled per attempt, capped at 8x.
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before attempt number `attempt` (1-based retry count).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay * (1 << (attempt - 1).min(3))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub baud_rate: u32,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Timeout of one line read while waiting for a sentinel.
    #[serde(with = "millis")]
    pub line_timeout: Duration,
    #[serde(with = "millis")]
    pub response_timeout: Duration,
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    #[serde(with = "millis")]
    pub simulation_duration: Duration,
    /// `None` waits for a dump forever.
    #[serde(with = "opt_millis")]
    pub phase_idle_timeout: Option<Duration>,
    /// Retries for metric responses.
    pub command_retry: RetryPolicy,
    /// Retries for `Simulation done!` (each attempt is one `line_timeout`).
    pub sentinel_retry: RetryPolicy,
    /// Longest wait for a start or stop button press. `None` waits forever.
    #[serde(with = "opt_millis")]
    pub button_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            line_timeout: DEFAULT_LINE_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            simulation_duration: DEFAULT_SIMULATION_DURATION,
            phase_idle_timeout: Some(DEFAULT_PHASE_IDLE_TIMEOUT),
            command_retry: RetryPolicy::default(),
            sentinel_retry: RetryPolicy::new(6, Duration::from_millis(100)),
            button_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| HrvError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HrvError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

/// Durations as integer milliseconds in config files.
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.line_timeout, Duration::from_secs(10));
        assert!(config.phase_idle_timeout.is_some());
        assert_eq!(config.button_timeout, None, "button waits are unbounded");
    }

    #[test]
    fn test_button_timeout_from_json() {
        let config = SessionConfig::from_json(r#"{"button_timeout": 90000000}"#).unwrap();
        assert_eq!(config.button_timeout, Some(Duration::from_secs(90_000)));
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = SessionConfig::from_json(
            r#"{"baud_rate": 9600, "line_timeout": 500, "phase_idle_timeout": null,
                "command_retry": {"max_attempts": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.line_timeout, Duration::from_millis(500));
        assert_eq!(config.phase_idle_timeout, None);
        assert_eq!(config.command_retry.max_attempts, 5);
        assert_eq!(config.command_retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.settle_delay, DEFAULT_SETTLE_DELAY);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            SessionConfig::from_json("{\"baud_rate\": \"fast\"}"),
            Err(HrvError::Config(_))
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(9), Duration::from_millis(800));
    }
}
