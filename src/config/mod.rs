//! # Relay Configuration
//!
//! Typed configuration for the dispatcher, fork-join aggregation, plan
//! execution, observers and logging. Values are layered by [`ConfigManager`]:
//! built-in defaults, then an optional TOML file, then `RELAY__`-prefixed
//! environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let dispatch = &manager.config().dispatch;
//! println!("max concurrent dispatches: {}", dispatch.max_concurrent_dispatches);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub dispatch: DispatchConfig,
    pub fork_join: ForkJoinConfig,
    pub executor: ExecutorConfig,
    pub observers: ObserversConfig,
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Reject values that would make the runtime misbehave
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatch.max_concurrent_dispatches == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.max_concurrent_dispatches",
                "0",
                "at least one concurrent dispatch is required",
            ));
        }

        if self.dispatch.zero_activity_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.zero_activity_capacity",
                "0",
                "broadcast capacity must be greater than 0",
            ));
        }

        if let Some(ttl) = self.fork_join.default_time_to_live_ms {
            if ttl == 0 {
                return Err(ConfigurationError::invalid_value(
                    "fork_join.default_time_to_live_ms",
                    ttl,
                    "omit the value for no deadline instead of using 0",
                ));
            }
        }

        if self.executor.default_activity_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.default_activity_timeout_ms",
                "0",
                "activity timeout must be greater than 0",
            ));
        }

        if self.executor.remote_request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.remote_request_timeout_ms",
                "0",
                "request timeout must be greater than 0",
            ));
        }

        if self.executor.default_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.default_max_attempts",
                "0",
                "an activity must be attempted at least once",
            ));
        }

        Ok(())
    }
}

/// Receive dispatcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound enforced by the receiver's concurrency limiter
    pub max_concurrent_dispatches: usize,
    /// How long a receiver waits for in-flight dispatches on shutdown
    pub drain_timeout_ms: u64,
    /// Buffered zero-activity events per subscriber
    pub zero_activity_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 16,
            drain_timeout_ms: 30_000,
            zero_activity_capacity: 64,
        }
    }
}

impl DispatchConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Fork-join aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkJoinConfig {
    /// Applied when a plan context is created without an explicit time-to-live
    pub default_time_to_live_ms: Option<u64>,
    /// Keep results that arrive after the aggregate resolved, for auditing
    pub record_late_results: bool,
}

impl Default for ForkJoinConfig {
    fn default() -> Self {
        Self {
            default_time_to_live_ms: None,
            record_late_results: true,
        }
    }
}

impl ForkJoinConfig {
    pub fn default_time_to_live(&self) -> Option<Duration> {
        self.default_time_to_live_ms.map(Duration::from_millis)
    }
}

/// Plan executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_activity_timeout_ms: u64,
    pub remote_request_timeout_ms: u64,
    pub default_max_attempts: u32,
    pub default_retry_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_activity_timeout_ms: 30_000,
            remote_request_timeout_ms: 10_000,
            default_max_attempts: 1,
            default_retry_interval_ms: 100,
        }
    }
}

impl ExecutorConfig {
    pub fn default_activity_timeout(&self) -> Duration {
        Duration::from_millis(self.default_activity_timeout_ms)
    }

    pub fn remote_request_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_request_timeout_ms)
    }

    pub fn default_retry_interval(&self) -> Duration {
        Duration::from_millis(self.default_retry_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserversConfig {
    /// Attach the tracing observer to every receiver
    pub log_events: bool,
}

impl Default for ObserversConfig {
    fn default() -> Self {
        Self { log_events: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; `RELAY_LOG` takes precedence when set
    pub level: Option<String>,
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.max_concurrent_dispatches, 16);
        assert_eq!(config.dispatch.drain_timeout(), Duration::from_secs(30));
        assert!(config.fork_join.record_late_results);
        assert!(config.fork_join.default_time_to_live().is_none());
        assert!(config.observers.log_events);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = RelayConfig::default();
        config.dispatch.max_concurrent_dispatches = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dispatch.max_concurrent_dispatches"));

        let mut config = RelayConfig::default();
        config.fork_join.default_time_to_live_ms = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let mut config = RelayConfig::default();
        config.executor.default_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: RelayConfig = serde_json::from_str(
            r#"{"dispatch": {"max_concurrent_dispatches": 4}, "logging": {"json": true}}"#,
        )
        .unwrap();
        assert_eq!(config.dispatch.max_concurrent_dispatches, 4);
        assert_eq!(config.dispatch.drain_timeout_ms, 30_000);
        assert!(config.logging.json);
        assert_eq!(config.executor, ExecutorConfig::default());
    }
}
