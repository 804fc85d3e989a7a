/// Error Module
///
/// This module defines the error taxonomy of the engine. Every fallible
/// operation returns [`DbError`]; driver failures are never swallowed and
/// nothing is retried.
use thiserror::Error;

/// Error type for every engine operation.
///
/// The variants map onto the failure classes callers have to tell apart:
/// - configuration problems (missing DSN, unknown driver, bad TOML)
/// - driver failures (malformed SQL at prepare time, constraint violations)
/// - query failures raised by engine read/write paths, carrying the SQL text
/// - malformed import batches and predicates, detected before any I/O
/// - transaction misuse (commit/rollback without an open transaction)
#[derive(Error, Debug)]
pub enum DbError {
    /// Missing or invalid connection, profiler or handler configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Errors raised directly by the SQLite driver
    #[error("Driver error: {0}")]
    Driver(#[from] rusqlite::Error),

    /// A statement issued by an engine operation failed
    #[error("Query error: {source} (sql: {sql})")]
    Query {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Malformed bulk-import input; the whole batch was rejected
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// A raw predicate with no condition text
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// Commit or rollback without a matching open transaction
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Re-labels a driver failure as a query failure for `sql`.
    ///
    /// Errors that did not come from the driver pass through untouched.
    pub(crate) fn into_query(self, sql: &str) -> Self {
        match self {
            DbError::Driver(source) => DbError::Query {
                sql: sql.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Returns `true` for failures of engine-issued statements.
    pub fn is_query(&self) -> bool {
        matches!(self, DbError::Query { .. })
    }

    /// Returns `true` for configuration failures, including parse errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, DbError::Configuration(_) | DbError::ConfigParse(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DbError>;
