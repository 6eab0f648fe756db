//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources are merged
//! in order, later sources winning:
//!
//! 1. [`RelayConfig::default`]
//! 2. `config/relay.toml` (or the file named by `RELAY_CONFIG_PATH`)
//! 3. `config/relay.{environment}.toml`, when present
//! 4. `RELAY__SECTION__KEY` environment variables

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::RelayConfig;

const DEFAULT_CONFIG_DIRECTORY: &str = "config";
const CONFIG_FILE_STEM: &str = "relay";
const ENV_PREFIX: &str = "RELAY";

/// Loaded, validated configuration plus the context it was loaded in
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: RelayConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let path = env::var("RELAY_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                Path::new(DEFAULT_CONFIG_DIRECTORY).join(format!("{CONFIG_FILE_STEM}.toml"))
            });
        Self::load_with_env(Some(path.as_path()), &environment)
    }

    /// Load from an explicit file, which must exist
    pub fn load_from_file(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        if !path.exists() {
            return Err(ConfigurationError::load(
                path.display().to_string(),
                "file not found",
            ));
        }
        Self::load_with_env(Some(path), &Self::detect_environment())
    }

    /// Load with an explicit environment name.
    /// Useful in tests that must not depend on process-wide variables.
    pub fn load_with_env(
        config_file: Option<&Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = Config::try_from(&RelayConfig::default())
            .map_err(|e| ConfigurationError::load("defaults", e.to_string()))?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = config_file {
            debug!(path = %path.display(), environment = %environment, "Loading relay configuration file");
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );

            if let Some(overlay) = Self::environment_overlay(path, environment) {
                builder = builder.add_source(
                    File::from(overlay)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let merged = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Self::source_error(config_file, e))?;

        let config: RelayConfig = merged
            .try_deserialize()
            .map_err(|e| Self::source_error(config_file, e))?;

        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_dispatches = config.dispatch.max_concurrent_dispatches,
            log_events = config.observers.log_events,
            "⚙️ Relay configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file: config_file.map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: RelayConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: None,
        }))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// `RELAY_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("RELAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn environment_overlay(path: &Path, environment: &str) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        let overlay = path.with_file_name(format!("{stem}.{environment}.toml"));
        overlay.exists().then_some(overlay)
    }

    fn source_error(path: Option<&Path>, err: config::ConfigError) -> ConfigurationError {
        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());
        ConfigurationError::load(source_name, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_with_env(Some(&dir.path().join("relay.toml")), "test").unwrap();
        assert_eq!(manager.config(), &RelayConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_file_and_environment_overlay() {
        let dir = TempDir::new().unwrap();
        let base = write(
            &dir,
            "relay.toml",
            "[dispatch]\nmax_concurrent_dispatches = 8\n\n[fork_join]\ndefault_time_to_live_ms = 5000\n",
        );
        write(
            &dir,
            "relay.staging.toml",
            "[dispatch]\nmax_concurrent_dispatches = 2\n",
        );

        let manager = ConfigManager::load_with_env(Some(&base), "staging").unwrap();
        assert_eq!(manager.config().dispatch.max_concurrent_dispatches, 2);
        assert_eq!(manager.config().fork_join.default_time_to_live_ms, Some(5000));
        assert_eq!(manager.config().dispatch.drain_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_file_value_fails_validation() {
        let dir = TempDir::new().unwrap();
        let base = write(&dir, "relay.toml", "[dispatch]\nmax_concurrent_dispatches = 0\n");
        let err = ConfigManager::load_with_env(Some(&base), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::Load { .. }));
    }
}
