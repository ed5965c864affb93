//! Configuration Loader
//!
//! Environment-aware loading: compiled defaults, then the base TOML file, then the
//! environment-specific TOML file, then `IMPORT__*` variables.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::ImportConfig;
use crate::error::Result;

const CONFIG_BASENAME: &str = "import-orchestrator";
const ENV_PREFIX: &str = "IMPORT";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ImportConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load from an explicit directory and environment without touching process state
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            database = %Self::redacted_url(&config.database.url),
            max_concurrent = config.queue.max_concurrent,
            lock_ttl_seconds = config.locks.default_ttl_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: ImportConfig) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> Result<ImportConfig> {
        let base = config_directory.join(format!("{CONFIG_BASENAME}.toml"));
        let overlay = config_directory.join(format!("{CONFIG_BASENAME}.{environment}.toml"));

        let built = Config::builder()
            .add_source(Config::try_from(&ImportConfig::default())?)
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize::<ImportConfig>()?)
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var("IMPORT_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Mask credentials in a connection URL for logging
    fn redacted_url(url: &str) -> String {
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &url[..scheme_end], &url[at..])
            }
            _ => url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_directory_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config(), &ImportConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();

        let mut base = std::fs::File::create(dir.path().join("import-orchestrator.toml")).unwrap();
        writeln!(base, "[queue]\nmax_concurrent = 4\n\n[locks]\nmax_acquire_attempts = 9").unwrap();

        let mut overlay =
            std::fs::File::create(dir.path().join("import-orchestrator.test.toml")).unwrap();
        writeln!(overlay, "[queue]\nmax_concurrent = 6").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().queue.max_concurrent, 6);
        assert_eq!(manager.config().locks.max_acquire_attempts, 9);
        // untouched keys keep their defaults
        assert_eq!(manager.config().queue.heartbeat_timeout_seconds, 120);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("import-orchestrator.toml")).unwrap();
        writeln!(base, "[queue]\nmax_concurrent = 0").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }

    #[test]
    fn test_redacted_url() {
        assert_eq!(
            ConfigManager::redacted_url("postgresql://user:secret@db:5432/imports"),
            "postgresql://***@db:5432/imports"
        );
        assert_eq!(
            ConfigManager::redacted_url("postgresql://localhost/imports"),
            "postgresql://localhost/imports"
        );
    }
}
