use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix, e.g. `FANLOG__STORAGE__DATABASE_URL`
pub const ENV_PREFIX: &str = "FANLOG";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Directory backing the shared-memory medium
    #[serde(default = "default_shared_memory_dir")]
    pub shared_memory_dir: PathBuf,
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// When false the shared-cache medium behaves as unavailable
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            shared_memory_dir: default_shared_memory_dir(),
            registry_path: default_registry_path(),
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PrivacyConfig {
    /// Salt prepended to values before hashing
    #[serde(default)]
    pub salt: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub respect_debug_flag: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rotation_interval")]
    pub interval_seconds: u64,
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_rotation_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_database_url() -> String {
    "sqlite://fanlog.db".to_string()
}

fn default_shared_memory_dir() -> PathBuf {
    PathBuf::from("fanlog-shm")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("loggers.toml")
}

fn default_true() -> bool {
    true
}

fn default_rotation_interval() -> u64 {
    3600
}

fn default_environment() -> String {
    "production".to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported log format '{0}' (expected text or json)")]
    LogFormat(String),

    #[error("storage.database_url cannot be empty")]
    EmptyDatabaseUrl,

    #[error("storage.registry_path cannot be empty")]
    EmptyRegistryPath,

    #[error("rotation.interval_seconds must be greater than zero")]
    ZeroRotationInterval,

    #[error("monitor.environment cannot be empty")]
    EmptyEnvironment,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.log_format.as_str() {
            "text" | "json" => {}
            other => return Err(ConfigError::LogFormat(other.to_string())),
        }
        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if self.storage.registry_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRegistryPath);
        }
        if self.rotation.enabled && self.rotation.interval_seconds == 0 {
            return Err(ConfigError::ZeroRotationInterval);
        }
        if self.monitor.environment.trim().is_empty() {
            return Err(ConfigError::EmptyEnvironment);
        }
        Ok(())
    }
}

/// Load settings from an optional TOML file plus `FANLOG__` environment
/// overrides, then validate them.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    if settings.privacy.salt.is_empty() {
        tracing::warn!("privacy.salt is empty; hashed identities can be reversed by dictionary lookup");
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.rotation.interval_seconds, 3600);
        assert!(settings.storage.cache_enabled);
        assert!(!settings.dispatch.respect_debug_flag);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.logging.log_format = "xml".to_string();
        assert_eq!(
            settings.validate(),
            Err(ConfigError::LogFormat("xml".to_string()))
        );

        let mut settings = Settings::default();
        settings.rotation.interval_seconds = 0;
        assert_eq!(settings.validate(), Err(ConfigError::ZeroRotationInterval));

        settings.rotation.enabled = false;
        assert!(settings.validate().is_ok());

        let mut settings = Settings::default();
        settings.storage.database_url = " ".to_string();
        assert_eq!(settings.validate(), Err(ConfigError::EmptyDatabaseUrl));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[storage]
database_url = "sqlite::memory:"
cache_enabled = false

[privacy]
salt = "pepper"

[dispatch]
respect_debug_flag = true
"#
        )
        .unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.storage.database_url, "sqlite::memory:");
        assert!(!settings.storage.cache_enabled);
        assert_eq!(settings.privacy.salt, "pepper");
        assert!(settings.dispatch.respect_debug_flag);
        assert_eq!(settings.logging.log_format, "text");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = load_settings(Path::new("/nonexistent/fanlog.toml")).unwrap();
        assert_eq!(settings.storage.registry_path, PathBuf::from("loggers.toml"));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[logging]\nlog_format = \"yaml\"").unwrap();

        let err = load_settings(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported log format"));
    }
}
