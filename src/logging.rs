//! # Structured Logging Module
//!
//! Environment-aware structured logging for dispatch and orchestration.
//! Console output is human readable by default and switches to JSON when
//! `logging.json` is set, for log shippers.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{ConfigManager, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging using environment defaults
pub fn init_structured_logging() {
    init_with_config(&LoggingConfig::default());
}

/// Initialize structured logging. Only the first call has any effect.
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let directive = resolve_filter(config, &environment);

        let console = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(directive.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(directive.clone()))
                .boxed()
        };

        // Embedding applications may already own the global subscriber
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            filter = %directive,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// `RELAY_LOG` wins over the configured level, which wins over the environment default
fn resolve_filter(config: &LoggingConfig, environment: &str) -> String {
    std::env::var("RELAY_LOG")
        .ok()
        .or_else(|| config.level.clone())
        .unwrap_or_else(|| get_log_level(environment))
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_configured_level_used_without_override() {
        if std::env::var("RELAY_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: Some("relay_core=trace".to_string()),
            json: false,
        };
        assert_eq!(resolve_filter(&config, "production"), "relay_core=trace");
        assert_eq!(resolve_filter(&LoggingConfig::default(), "production"), "info");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_with_config(&LoggingConfig {
            level: None,
            json: true,
        });
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
