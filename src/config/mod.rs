//! Application configuration.
//!
//! Aggregates configuration from all transports into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod transport;

pub use transport::{
    AmazonConfig, FileDropConfig, RelayConfig, WindowConfig, DEFAULT_DIRECTORY_NAME,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "xdmessaging.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "XDMESSAGING_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "XDMESSAGING";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "XDMESSAGING_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File-drop transport.
    pub file_drop: FileDropConfig,
    /// Amazon SNS/SQS transport.
    pub amazon: AmazonConfig,
    /// Window-messaging transport.
    pub window: WindowConfig,
    /// Network relay.
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `xdmessaging.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Create config for testing, rooted in `base`.
    pub fn for_test(base: &std::path::Path) -> Self {
        Self {
            file_drop: FileDropConfig::with_base_path(base.join("drop")),
            amazon: AmazonConfig::default().with_counter_path(base.join("counters")),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.file_drop.retention_secs, 5);
        assert_eq!(config.amazon.region, "us-east-1");
        assert!(!config.amazon.has_credentials());
        assert_eq!(config.window.send_timeout_ms, 1000);
        assert_eq!(config.relay.retry_interval_secs, 10);
    }

    #[test]
    fn test_config_from_yaml_overrides_sections() {
        let yaml = r#"
file_drop:
  base_path: /var/tmp/xd
  retention_secs: 12
amazon:
  access_key: AKIA
  secret_key: s3cr3t
  unique_app_key: myapp
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.file_drop.base_path,
            std::path::PathBuf::from("/var/tmp/xd")
        );
        assert_eq!(config.file_drop.retention_secs, 12);
        assert_eq!(config.file_drop.poll_interval_ms, 100);
        assert!(config.amazon.has_credentials());
        assert_eq!(config.amazon.unique_app_key, "myapp");
    }

    #[test]
    #[serial]
    fn test_config_load_from_env() {
        std::env::set_var("XDMESSAGING__AMAZON__UNIQUE_APP_KEY", "from-env");
        std::env::set_var("XDMESSAGING__FILE_DROP__RETENTION_SECS", "9");
        let config = Config::load(None).unwrap();
        std::env::remove_var("XDMESSAGING__AMAZON__UNIQUE_APP_KEY");
        std::env::remove_var("XDMESSAGING__FILE_DROP__RETENTION_SECS");

        assert_eq!(config.amazon.unique_app_key, "from-env");
        assert_eq!(config.file_drop.retention_secs, 9);
    }
}
