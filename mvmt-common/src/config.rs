//! Configuration loading
//!
//! Settings are resolved once at startup into an [`IngestConfig`] which is then
//! passed explicitly to every component. Priority order per key:
//! 1. Command-line override (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Built-in default (optional keys only)
//!
//! The four cloud identifiers (subscription, resource group, workspace,
//! storage account) have no default; if none of the sources supply them,
//! loading fails with [`Error::Config`].

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit TOML config path
pub const CONFIG_PATH_ENV: &str = "MVMT_CONFIG";

/// Blob container receiving raw uploads unless overridden
pub const DEFAULT_CONTAINER: &str = "movements";

/// Dataset asset name registered after each ingestion run
pub const DEFAULT_DATASET_NAME: &str = "movements_dataset_v";

/// Environment variable names, shared by the resolver and the docs
pub mod env_keys {
    pub const SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
    pub const RESOURCE_GROUP: &str = "AZURE_RESOURCE_GROUP";
    pub const WORKSPACE: &str = "AZURE_WORKSPACE";
    pub const STORAGE_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
    pub const CONNECTION_STRING: &str = "AZURE_STORAGE_CONNECTION_STRING";
    pub const RAW_DATA_SAS_URL: &str = "RAW_DATA_SAS_URL";
    pub const FEATURE_SETS_SAS_URL: &str = "FEATURE_SETS_SAS_URL";
    pub const DEBUG: &str = "DEBUG";
    pub const CONTAINER: &str = "MVMT_CONTAINER";
    pub const DATASET_NAME: &str = "MVMT_DATASET_NAME";
    pub const CATALOG_PATH: &str = "MVMT_CATALOG_PATH";
    pub const MAX_CONCURRENT_UPLOADS: &str = "MVMT_MAX_CONCURRENT_UPLOADS";
}

/// Settings as they appear in the TOML file. Every key is optional here;
/// required-ness is enforced when building [`IngestConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub workspace: Option<String>,
    pub storage_account: Option<String>,
    pub connection_string: Option<String>,
    pub raw_data_sas_url: Option<String>,
    pub feature_sets_sas_url: Option<String>,
    pub debug: Option<bool>,
    pub container: Option<String>,
    pub dataset_name: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub max_concurrent_uploads: Option<usize>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
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
    "info".to_string()
}

impl TomlConfig {
    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load the config file from `MVMT_CONFIG` or the platform config dir.
    ///
    /// A missing default file is not an error: defaults are returned.
    /// An explicitly named file that is missing or malformed is.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_file(&path)
            }
            _ => {
                debug!("No config file found, using environment and defaults");
                Ok(Self::default())
            }
        }
    }
}

/// `~/.config/mvmt/config.toml` (or the platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mvmt").join("config.toml"))
}

fn default_catalog_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mvmt"))
        .unwrap_or_else(|| PathBuf::from("./mvmt_data"))
        .join("catalog.db")
}

/// Values given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub container: Option<String>,
    pub dataset_name: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub max_concurrent_uploads: Option<usize>,
    pub debug: Option<bool>,
    pub log_level: Option<String>,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace: String,
    pub storage_account: String,
    /// Pre-built storage connection string; skips the `az` lookup when set
    pub connection_string: Option<String>,
    /// Container SAS URL for raw uploads
    pub raw_data_sas_url: Option<String>,
    /// Container SAS URL for feature sets
    pub feature_sets_sas_url: Option<String>,
    pub debug: bool,
    pub log_level: String,
    pub container: String,
    pub dataset_name: String,
    pub catalog_path: PathBuf,
    pub max_concurrent_uploads: usize,
}

impl IngestConfig {
    /// Resolve from the process environment and the default config file
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let toml_config = TomlConfig::load_default()?;
        Self::resolve(&toml_config, |key| std::env::var(key).ok(), overrides)
    }

    /// Resolve from explicit sources.
    ///
    /// `env` looks up an environment variable by name; tests pass a closure
    /// over a map instead of touching the process environment.
    pub fn resolve<F>(toml_config: &TomlConfig, env: F, overrides: &ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let required = |key: &str, fallback: &Option<String>| -> Result<String> {
            lookup(key)
                .or_else(|| fallback.clone().filter(|v| !v.trim().is_empty()))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "{} not configured (set the environment variable or the TOML key)",
                        key
                    ))
                })
        };

        let subscription_id = required(env_keys::SUBSCRIPTION_ID, &toml_config.subscription_id)?;
        let resource_group = required(env_keys::RESOURCE_GROUP, &toml_config.resource_group)?;
        let workspace = required(env_keys::WORKSPACE, &toml_config.workspace)?;
        let storage_account = required(env_keys::STORAGE_ACCOUNT, &toml_config.storage_account)?;

        let optional = |key: &str, fallback: &Option<String>| -> Option<String> {
            lookup(key).or_else(|| fallback.clone().filter(|v| !v.trim().is_empty()))
        };

        let debug = overrides
            .debug
            .or_else(|| lookup(env_keys::DEBUG).map(|v| is_truthy(&v)))
            .or(toml_config.debug)
            .unwrap_or(false);

        let max_concurrent_uploads = match overrides.max_concurrent_uploads {
            Some(n) => n,
            None => match lookup(env_keys::MAX_CONCURRENT_UPLOADS) {
                Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                    Error::Config(format!(
                        "{} must be a positive integer, got '{}'",
                        env_keys::MAX_CONCURRENT_UPLOADS,
                        raw
                    ))
                })?,
                None => toml_config.max_concurrent_uploads.unwrap_or(1),
            },
        };
        if max_concurrent_uploads == 0 {
            return Err(Error::Config(
                "max_concurrent_uploads must be at least 1".to_string(),
            ));
        }

        let catalog_path = overrides
            .catalog_path
            .clone()
            .or_else(|| lookup(env_keys::CATALOG_PATH).map(PathBuf::from))
            .or_else(|| toml_config.catalog_path.clone())
            .unwrap_or_else(default_catalog_path);

        let config = Self {
            subscription_id,
            resource_group,
            workspace,
            storage_account,
            connection_string: optional(env_keys::CONNECTION_STRING, &toml_config.connection_string),
            raw_data_sas_url: optional(env_keys::RAW_DATA_SAS_URL, &toml_config.raw_data_sas_url),
            feature_sets_sas_url: optional(
                env_keys::FEATURE_SETS_SAS_URL,
                &toml_config.feature_sets_sas_url,
            ),
            debug,
            log_level: overrides
                .log_level
                .clone()
                .unwrap_or_else(|| toml_config.logging.level.clone()),
            container: overrides
                .container
                .clone()
                .or_else(|| optional(env_keys::CONTAINER, &toml_config.container))
                .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            dataset_name: overrides
                .dataset_name
                .clone()
                .or_else(|| optional(env_keys::DATASET_NAME, &toml_config.dataset_name))
                .unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string()),
            catalog_path,
            max_concurrent_uploads,
        };

        if config.connection_string.is_some() && config.raw_data_sas_url.is_some() {
            warn!("Both a connection string and a raw-data SAS URL are configured; the SAS URL is used for uploads");
        }

        Ok(config)
    }

    /// Effective tracing level: `debug` when the debug flag is set
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

/// Interpret a flag value. Empty and the usual negatives are false.
pub fn is_truthy(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    !matches!(v.as_str(), "" | "0" | "false" | "no" | "off")
}
