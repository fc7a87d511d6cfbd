//! YAML configuration: target database connection and exchange file names.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub files: FilesConfig,
}

/// Connection settings for the PostgreSQL installation this run talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Schema search path set right after connecting.
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

/// Names of the files exchanged between installations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Mapping description (the model).
    pub description: String,

    /// Structure cache generated by introspection.
    pub structure: String,

    /// Exported record trees.
    pub data: String,

    /// Optional key filter restricting the first primary table.
    pub keys: String,

    /// Generated table-creation script.
    pub sql: String,

    /// Archive packing the whole exchange.
    pub zip: String,

    /// Folder holding externalized binary payloads.
    pub binary_folder: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        FilesConfig {
            description: "dbexportdescription.json".to_string(),
            structure: "dbexportstructure.json".to_string(),
            data: "dbexportdata.json".to_string(),
            keys: "dbexportkeys.json".to_string(),
            sql: "dbcreate.sql".to_string(),
            zip: "dbexport.zip".to_string(),
            binary_folder: "binary".to_string(),
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_search_path() -> String {
    "public".to_string()
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| {
            ExchangeError::Config(format!(
                "unable to read the configuration file {}: {}",
                path.display(),
                source
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.host.is_empty() {
            return Err(ExchangeError::Config("database.host is required".into()));
        }
        if self.database.database.is_empty() {
            return Err(ExchangeError::Config("database.database is required".into()));
        }
        if self.database.user.is_empty() {
            return Err(ExchangeError::Config("database.user is required".into()));
        }
        if self.files.description.is_empty() {
            return Err(ExchangeError::Config(
                "files.description must not be empty".into(),
            ));
        }
        Ok(())
    }
}
