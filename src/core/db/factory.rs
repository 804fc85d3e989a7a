/// Connection Factory Module
///
/// Builds fresh [`Connection`]s from named configuration entries. Pooling and
/// reuse belong to the client engine; every call here opens a new handle.
use crate::config::{ConnectionAttributes, DatabaseConfig};
use crate::core::db::connection::Connection;
use crate::core::{DbError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::OpenFlags;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

static DSN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<driver>[A-Za-z][A-Za-z0-9+_-]*):(?P<target>.*)$").expect("valid DSN pattern"));

static PRAGMA_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid pragma pattern"));

/// Database drivers the engine can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Sqlite,
}

impl Driver {
    /// Resolves a DSN driver prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Driver::Sqlite),
            _ => None,
        }
    }

    /// Opening and closing identifier quote characters.
    pub fn identifier_quotes(&self) -> (char, char) {
        match self {
            Driver::Sqlite => ('"', '"'),
        }
    }

    /// Quotes an identifier for this driver.
    ///
    /// Embedded closing quotes are doubled and dotted names are quoted per
    /// segment; a bare `*` segment is left alone.
    pub fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.identifier_quotes();
        name.split('.')
            .map(|segment| {
                if segment == "*" {
                    return segment.to_string();
                }
                let escaped = segment.replace(close, &format!("{close}{close}"));
                format!("{open}{escaped}{close}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Where a DSN points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Memory,
    File(String),
}

/// A parsed `<driver>:<target>` data source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    pub driver: Driver,
    pub target: Target,
}

impl Dsn {
    /// Parses a DSN such as `sqlite::memory:` or `sqlite:/var/db/app.db`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Configuration` for malformed DSNs and unknown drivers.
    pub fn parse(dsn: &str) -> Result<Self> {
        let captures = DSN_PATTERN
            .captures(dsn.trim())
            .ok_or_else(|| DbError::Configuration(format!("malformed DSN '{}'", dsn)))?;
        let driver_name = &captures["driver"];
        let driver = Driver::from_name(driver_name)
            .ok_or_else(|| DbError::Configuration(format!("unsupported driver '{}' in DSN '{}'", driver_name, dsn)))?;
        let target = match &captures["target"] {
            "" | ":memory:" => Target::Memory,
            path => Target::File(path.to_string()),
        };
        Ok(Dsn { driver, target })
    }
}

/// Opens connections described by a [`DatabaseConfig`] plus named entries.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
    default: DatabaseConfig,
    named: HashMap<String, crate::config::ConnectionConfig>,
}

impl ConnectionFactory {
    pub fn new(default: DatabaseConfig, named: HashMap<String, crate::config::ConnectionConfig>) -> Self {
        ConnectionFactory { default, named }
    }

    /// Opens a new connection for `name` (`None` is the default connection).
    ///
    /// A name without its own entry falls back to the default DSN.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Configuration` when neither a named entry nor a
    /// default DSN exists or the DSN is invalid, and `DbError::Driver` when
    /// SQLite fails to open the database or apply an attribute.
    pub fn create_connection(&self, name: Option<&str>) -> Result<Connection> {
        let name = name.filter(|n| !n.is_empty());
        let (dsn, attributes) = self.resolve(name)?;
        let dsn = Dsn::parse(dsn)?;

        let handle = open_handle(&dsn, attributes)?;
        apply_attributes(&handle, attributes)?;
        debug!(connection = name.unwrap_or("default"), target = ?dsn.target, "opened connection");
        Ok(Connection::new(name, handle))
    }

    fn resolve(&self, name: Option<&str>) -> Result<(&str, &ConnectionAttributes)> {
        if let Some(entry) = name.and_then(|n| self.named.get(n)) {
            let attributes = entry.attributes.as_ref().unwrap_or(&self.default.attributes);
            return Ok((&entry.dsn, attributes));
        }
        match &self.default.dsn {
            Some(dsn) => Ok((dsn, &self.default.attributes)),
            None => Err(DbError::Configuration(match name {
                Some(n) => format!("no configuration for connection '{}' and no default DSN", n),
                None => "no default DSN configured".to_string(),
            })),
        }
    }
}

fn open_handle(dsn: &Dsn, attributes: &ConnectionAttributes) -> Result<rusqlite::Connection> {
    let handle = match (&dsn.target, attributes.read_only) {
        (Target::Memory, _) => rusqlite::Connection::open_in_memory()?,
        (Target::File(path), false) => rusqlite::Connection::open(path)?,
        (Target::File(path), true) => rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?,
    };
    Ok(handle)
}

fn apply_attributes(handle: &rusqlite::Connection, attributes: &ConnectionAttributes) -> Result<()> {
    handle.pragma_update(None, "foreign_keys", attributes.foreign_keys)?;
    if let Some(ms) = attributes.busy_timeout_ms {
        handle.busy_timeout(Duration::from_millis(ms))?;
    }
    if let Some(capacity) = attributes.statement_cache_capacity {
        handle.set_prepared_statement_cache_capacity(capacity);
    }
    for (pragma, value) in &attributes.pragmas {
        if !PRAGMA_NAME.is_match(pragma) {
            return Err(DbError::Configuration(format!("invalid pragma name '{}'", pragma)));
        }
        // Some pragmas (journal_mode, ...) answer with a row; drain it.
        let sql = format!("PRAGMA {} = {}", pragma, pragma_literal(value));
        let mut stmt = handle.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }
    Ok(())
}

fn pragma_literal(value: &str) -> String {
    let bare = value.parse::<f64>().is_ok() || PRAGMA_NAME.is_match(value);
    if bare {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}
