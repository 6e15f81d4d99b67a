use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pki_generator::{Digest, KeyType};

pub const DEFAULT_CONFIG_PATH: &str = "ca-hierarchy.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            key_dir: default_key_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("data/keys")
}

#[derive(Debug, Deserialize, Clone)]
pub struct Defaults {
    #[serde(default)]
    pub digest_algorithm: Digest,
    #[serde(default)]
    pub key_type: KeyType,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_min_key_size")]
    pub min_key_size: u32,
    #[serde(default = "default_ca_validity")]
    pub ca_validity_days: u32,
    #[serde(default = "default_cert_validity")]
    pub cert_validity_days: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            digest_algorithm: Digest::default(),
            key_type: KeyType::default(),
            key_size: default_key_size(),
            min_key_size: default_min_key_size(),
            ca_validity_days: default_ca_validity(),
            cert_validity_days: default_cert_validity(),
        }
    }
}

fn default_key_size() -> u32 {
    4096
}

fn default_min_key_size() -> u32 {
    2048
}

fn default_ca_validity() -> u32 {
    365 * 10
}

fn default_cert_validity() -> u32 {
    730
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Key sizes must be a power of two and at least `min_key_size`.
pub fn validate_key_size(key_size: u32, min_key_size: u32) -> Result<()> {
    if !key_size.is_power_of_two() {
        return Err(anyhow!("{}: Key size must be a power of two", key_size));
    }
    if key_size < min_key_size {
        return Err(anyhow!(
            "{}: Key size must be at least {} bits",
            key_size,
            min_key_size
        ));
    }
    Ok(())
}

impl AppConfig {
    /// Parse a configuration document and validate it.
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(config_str).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&config_str)
    }

    /// Load `path`, or [`DEFAULT_CONFIG_PATH`]. A missing default file
    /// yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.defaults.key_type == KeyType::Rsa {
            validate_key_size(self.defaults.key_size, self.defaults.min_key_size)
                .context("Invalid [defaults] key_size")?;
        }
        if self.defaults.ca_validity_days == 0 || self.defaults.cert_validity_days == 0 {
            return Err(anyhow!("Validity periods must be at least one day"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.defaults.digest_algorithm, Digest::Sha256);
        assert_eq!(config.defaults.key_size, 4096);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml(
            r#"
            [storage]
            data_dir = "/var/lib/ca"
            key_dir = "/var/lib/ca/keys"

            [defaults]
            digest_algorithm = "sha512"
            key_type = "ec"
            ca_validity_days = 100

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.key_dir, PathBuf::from("/var/lib/ca/keys"));
        assert_eq!(config.defaults.digest_algorithm, Digest::Sha512);
        assert_eq!(config.defaults.key_type, KeyType::Ec);
        assert_eq!(config.defaults.ca_validity_days, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_hash_algorithm() {
        let err = AppConfig::from_toml("[defaults]\ndigest_algorithm = \"md5\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown hash algorithm: md5"));
    }

    #[test]
    fn test_key_size_validation() {
        assert!(validate_key_size(4096, 2048).is_ok());
        assert!(validate_key_size(3000, 2048).is_err());
        assert!(validate_key_size(1024, 2048).is_err());
        assert!(AppConfig::from_toml("[defaults]\nkey_size = 1024\n").is_err());
    }
}
