mod database;
mod directory;
mod logging;

pub use database::DatabaseConfig;
pub use directory::DirectoryConfig;
pub use logging::LoggingConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StratumError};

/// Root configuration for stratum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratumConfig {
    /// Relational store connection.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration engine settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Directory store settings, absent when no directory namespace is used.
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StratumConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StratumError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        toml::from_str(&content)
            .map_err(|e| StratumError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Configuration with defaults and the given database URL.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Migration engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Table holding one version row per namespace.
    #[serde(default = "default_version_table")]
    pub version_table: String,

    /// Hold a per-namespace advisory lock for the duration of a run.
    #[serde(default = "default_true")]
    pub advisory_lock: bool,

    /// Namespaces migrated when no namespace is named explicitly.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            version_table: default_version_table(),
            advisory_lock: true,
            namespaces: Vec::new(),
        }
    }
}

fn default_version_table() -> String {
    "stratum_versions".to_string()
}

fn default_true() -> bool {
    true
}

/// Substitute environment variables in the format ${VAR_NAME}.
///
/// Unset variables are left in place.
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| StratumError::Internal(format!("Invalid substitution pattern: {}", e)))?;

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => result = result.replace(&cap[0], &value),
            Err(_) => tracing::debug!("Config references unset variable {}", var_name),
        }
    }

    Ok(result)
}
