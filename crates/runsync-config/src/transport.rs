use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Reconnect and keep-alive settings for the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  /// First reconnect delay after a failure. Doubles per consecutive failure.
  pub reconnect_base_ms: u64,
  /// Ceiling for the reconnect delay.
  pub reconnect_max_ms: u64,
  /// A stream that produces no bytes for this long is treated as dropped.
  pub heartbeat_timeout_ms: u64,
  /// Keep the stream open even when nothing is subscribed.
  pub keep_alive: bool,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      reconnect_base_ms: 2_000,
      reconnect_max_ms: 60_000,
      heartbeat_timeout_ms: 120_000,
      keep_alive: false,
    }
  }
}

impl TransportConfig {
  pub fn reconnect_base(&self) -> Duration {
    Duration::from_millis(self.reconnect_base_ms)
  }

  pub fn reconnect_max(&self) -> Duration {
    Duration::from_millis(self.reconnect_max_ms)
  }

  pub fn heartbeat_timeout(&self) -> Duration {
    Duration::from_millis(self.heartbeat_timeout_ms)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.reconnect_base_ms == 0 {
      return Err(ConfigError::invalid(
        "transport.reconnect_base_ms",
        "must be greater than zero",
      ));
    }
    if self.reconnect_max_ms < self.reconnect_base_ms {
      return Err(ConfigError::invalid(
        "transport.reconnect_max_ms",
        format!(
          "must be at least reconnect_base_ms ({})",
          self.reconnect_base_ms
        ),
      ));
    }
    if self.heartbeat_timeout_ms == 0 {
      return Err(ConfigError::invalid(
        "transport.heartbeat_timeout_ms",
        "must be greater than zero",
      ));
    }
    Ok(())
  }
}
