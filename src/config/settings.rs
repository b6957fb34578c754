//! TOML-based configuration for relmap.
//!
//! Supports a config file (relmap.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [engine]
//! schema = "dbo"
//! languages = ["en", "fr", "zh-CN"]
//! site = "north"
//! statement_timeout_secs = 600
//!
//! [connections.main]
//! connection_string = "Server=${DB_HOST};Database=Shop"
//! worker = "/usr/local/bin/relmap-worker"
//!
//! [datasets.Orders]
//! connection = "main"
//! schema = "sales"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Engine-wide settings.
    pub engine: EngineSettings,

    /// Named database connections.
    pub connections: HashMap<String, ConnectionSettings>,

    /// Per-dataset connection and schema overrides.
    pub datasets: HashMap<String, DatasetSettings>,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Default schema (owner) for generated objects.
    pub schema: String,

    /// Active language identifiers for multi-language text.
    pub languages: Vec<String>,

    /// Site scope value; when set, site-scoped tables filter on it.
    pub site: Option<String>,

    /// Timeout ceiling for a single statement.
    pub statement_timeout_secs: u64,

    /// Install `{Dataset}__*` procedures and table types alongside tables.
    pub emit_procedures: bool,

    /// Rows per chunk for export and import.
    pub export_chunk_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schema: "dbo".to_string(),
            languages: vec!["en".to_string()],
            site: None,
            statement_timeout_secs: 600,
            emit_procedures: true,
            export_chunk_size: 500,
        }
    }
}

impl EngineSettings {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Worker binary executing statements for this connection.
    #[serde(default)]
    pub worker: Option<String>,
}

impl ConnectionSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }

    /// Worker path with environment variables expanded.
    pub fn worker_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.worker
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Per-dataset settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// Name of the connection under `[connections]`.
    pub connection: Option<String>,

    /// Schema override for this dataset.
    pub schema: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `RELMAP_CONFIG`
    /// 2. `./relmap.toml`
    /// 3. `~/.config/relmap/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("RELMAP_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("relmap.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("relmap").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.engine.languages.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "engine.languages must not be empty".into(),
            ));
        }
        if self.engine.export_chunk_size == 0 {
            return Err(SettingsError::InvalidConfig(
                "engine.export_chunk_size must be positive".into(),
            ));
        }
        for (dataset, ds) in &self.datasets {
            if let Some(conn) = &ds.connection {
                if !self.connections.contains_key(conn) {
                    return Err(SettingsError::InvalidConfig(format!(
                        "dataset {} refers to unknown connection {}",
                        dataset, conn
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection ("default" if it exists, else the first by name).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionSettings)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections
            .iter()
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Connection serving a dataset: its configured connection, else the default.
    pub fn connection_for(&self, dataset: &str) -> Result<&ConnectionSettings, SettingsError> {
        match self.datasets.get(dataset).and_then(|d| d.connection.as_deref()) {
            Some(name) => self.get_connection(name),
            None => self
                .default_connection()
                .map(|(_, c)| c)
                .ok_or_else(|| SettingsError::ConnectionNotFound(dataset.to_string())),
        }
    }

    /// Schema (owner) for a dataset.
    pub fn schema_for(&self, dataset: &str) -> &str {
        self.datasets
            .get(dataset)
            .and_then(|d| d.schema.as_deref())
            .unwrap_or(&self.engine.schema)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("RELMAP_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${RELMAP_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("Server=${RELMAP_TEST_VAR};Database=x").unwrap(),
            "Server=hello;Database=x"
        );
        env::remove_var("RELMAP_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("RELMAP_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$RELMAP_TEST_VAR2!").unwrap(), "world!");
        assert_eq!(expand_env_vars("cost $").unwrap(), "cost $");
        env::remove_var("RELMAP_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        assert!(expand_env_vars("${NONEXISTENT_VAR_12345}").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[engine]
schema = "app"
languages = ["en", "fr"]
site = "north"

[connections.main]
connection_string = "Server=localhost;Database=Shop"

[connections.archive]
connection_string = "Server=localhost;Database=Archive"
worker = "/opt/worker"

[datasets.Orders]
connection = "archive"
schema = "sales"
"#;

        let settings = Settings::from_toml(toml).unwrap();

        assert_eq!(settings.engine.schema, "app");
        assert_eq!(settings.engine.languages, vec!["en", "fr"]);
        assert_eq!(settings.engine.site.as_deref(), Some("north"));
        assert_eq!(settings.engine.statement_timeout_secs, 600);

        assert_eq!(settings.schema_for("Orders"), "sales");
        assert_eq!(settings.schema_for("Customers"), "app");
        assert_eq!(
            settings.connection_for("Orders").unwrap().connection_string,
            "Server=localhost;Database=Archive"
        );
        assert_eq!(
            settings.connection_for("Customers").unwrap().connection_string,
            "Server=localhost;Database=Archive"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.engine.schema, "dbo");
        assert!(settings.engine.emit_procedures);
        assert_eq!(settings.engine.export_chunk_size, 500);
        assert_eq!(settings.engine.statement_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_empty_languages_rejected() {
        let err = Settings::from_toml("[engine]\nlanguages = []\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_dataset_connection_rejected() {
        let err = Settings::from_toml("[datasets.X]\nconnection = \"nope\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown connection"));
    }
}
