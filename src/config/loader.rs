//! Configuration Loader
//!
//! Environment-aware loading: base file, per-environment override file, then
//! `COHERENCE__`-prefixed environment variables, merged by the `config` crate
//! and validated before use.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::{redact_url, CoherenceConfig};

const ENV_PREFIX: &str = "COHERENCE";
const BASE_FILE_STEM: &str = "coherence";

pub struct ConfigManager {
    config: CoherenceConfig,
    environment: String,
    config_directory: PathBuf,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("environment", &self.environment)
            .field("config_directory", &self.config_directory)
            .finish()
    }
}

impl ConfigManager {
    /// Load configuration from `./config` with environment auto-detection.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment name, without touching process
    /// environment detection. Environment variables still override files.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment,
            broker_provider = ?config.broker.provider,
            broker_url = %redact_url(&config.broker.url),
            cache_provider = ?config.cache.provider,
            cache_url = %redact_url(&config.cache.url),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(directory: &Path, environment: &str) -> ConfigResult<CoherenceConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<CoherenceConfig>()
            .map_err(ConfigurationError::from)
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

/// `COHERENCE_ENV`, then `APP_ENV`, defaulting to `development`.
pub fn detect_environment() -> String {
    env::var("COHERENCE_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerProviderKind, CacheProviderKind};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().broker.exchange, "post-service");
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("coherence.toml"),
            r#"
[broker]
provider = "in_memory"
prefetch_count = 4

[cache]
provider = "memory"
list_ttl_seconds = 120
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("coherence.staging.toml"),
            r#"
[cache]
list_ttl_seconds = 60
"#,
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();
        let config = manager.config();
        assert_eq!(config.broker.provider, BrokerProviderKind::InMemory);
        assert_eq!(config.broker.prefetch_count, 4);
        assert_eq!(config.cache.provider, CacheProviderKind::Memory);
        assert_eq!(config.cache.list_ttl_seconds, 60);
        assert_eq!(config.cache.detail_ttl_seconds, 600);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("coherence.toml"),
            "[broker]\nprefetch_count = 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn shipped_configuration_loads_in_every_environment() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
        for environment in ["development", "test", "production"] {
            let manager =
                ConfigManager::load_from_directory_with_env(Some(dir.clone()), environment)
                    .unwrap();
            assert_eq!(manager.config().media_worker.routing_key, "post.deleted");
        }

        let test = ConfigManager::load_from_directory_with_env(Some(dir), "test").unwrap();
        assert_eq!(test.config().broker.provider, BrokerProviderKind::InMemory);
        assert_eq!(test.config().cache.provider, CacheProviderKind::Memory);
    }

    #[test]
    fn explicit_missing_directory_is_an_error() {
        let result = ConfigManager::load_from_directory_with_env(
            Some(PathBuf::from("/definitely/not/here")),
            "test",
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::DirectoryNotFound { .. })
        ));
    }
}
