use crate::core::{DbError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub connections: HashMap<String, ConnectionConfig>,
    pub profiler: ProfilerConfig,
    pub import: ImportConfig,
}

/// The default (unnamed) connection and attributes shared by every connection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dsn: Option<String>,
    pub attributes: ConnectionAttributes,
}

/// A named connection entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub dsn: String,
    /// Overrides the shared attributes when present.
    pub attributes: Option<ConnectionAttributes>,
}

/// Driver attributes applied to every new connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionAttributes {
    pub foreign_keys: bool,
    pub busy_timeout_ms: Option<u64>,
    pub statement_cache_capacity: Option<usize>,
    pub read_only: bool,
    /// Extra `PRAGMA name = value` settings, applied in name order.
    pub pragmas: BTreeMap<String, String>,
}

impl Default for ConnectionAttributes {
    fn default() -> Self {
        ConnectionAttributes {
            foreign_keys: true,
            busy_timeout_ms: None,
            statement_cache_capacity: None,
            read_only: false,
            pragmas: BTreeMap::new(),
        }
    }
}

/// Profiler toggles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub enabled: bool,
    /// Log records through `tracing` when no handler is configured.
    pub log: bool,
    pub handler: Option<HandlerKind>,
}

/// Built-in profile handlers selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// One JSON document per record, logged at debug level.
    Json,
    /// One formatted line per record on standard error.
    Stderr,
}

/// Bulk-import defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: Option<usize>,
}

impl Config {
    /// Configuration with a single default DSN and everything else defaulted.
    pub fn with_dsn(dsn: &str) -> Self {
        Config {
            database: DatabaseConfig {
                dsn: Some(dsn.to_string()),
                ..DatabaseConfig::default()
            },
            ..Config::default()
        }
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file at the given path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// let config = dbclient::Config::load("dbclient.toml").expect("Failed to load config");
    /// println!("{:?}", config);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Conventional location: `<config dir>/dbclient/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dbclient").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.import.batch_size == Some(0) {
            return Err(DbError::Configuration("import.batch_size must be greater than zero".into()));
        }
        if let Some(name) = self.connections.keys().find(|name| name.is_empty()) {
            return Err(DbError::Configuration(format!(
                "connection name {:?} is reserved for the default connection",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[database]
dsn = "sqlite::memory:"

[database.attributes]
foreign_keys = true
busy_timeout_ms = 5000
statement_cache_capacity = 32
pragmas = { journal_mode = "MEMORY" }

[connections.backup]
dsn = "sqlite:/tmp/backup.db"

[connections.reporting]
dsn = "sqlite:/tmp/reporting.db"
attributes = { read_only = true }

[profiler]
enabled = true
log = true
handler = "json"

[import]
batch_size = 500
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = Config::from_toml_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.database.dsn.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.database.attributes.busy_timeout_ms, Some(5000));
        assert_eq!(config.database.attributes.pragmas["journal_mode"], "MEMORY");
        assert_eq!(config.connections["backup"].dsn, "sqlite:/tmp/backup.db");
        assert!(config.connections["backup"].attributes.is_none());

        let reporting = config.connections["reporting"].attributes.as_ref().unwrap();
        assert!(reporting.read_only);
        assert!(reporting.foreign_keys, "unspecified attributes keep their defaults");

        assert!(config.profiler.enabled);
        assert!(config.profiler.log);
        assert_eq!(config.profiler.handler, Some(HandlerKind::Json));
        assert_eq!(config.import.batch_size, Some(500));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.database.dsn.is_none());
        assert!(config.connections.is_empty());
        assert!(!config.profiler.enabled);
        assert!(config.database.attributes.foreign_keys);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Config::from_toml_str("[import]\nbatch_size = 0\n").unwrap_err();
        assert!(err.is_configuration());

        let err = Config::from_toml_str("[profiler]\nhandler = \"carrier-pigeon\"\n").unwrap_err();
        assert!(matches!(err, DbError::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.connections.len(), 2);

        assert!(matches!(Config::load("/nonexistent/dbclient.toml"), Err(DbError::Io(_))));
    }
}
