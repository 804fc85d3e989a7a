/// Connection Module
///
/// A [`Connection`] wraps one live SQLite handle together with its naming,
/// identifier-quoting rules and transaction-nesting state.
///
/// ## Transaction nesting
///
/// Each connection counts logically nested transactions. Only the outermost
/// begin and the final commit reach the driver; a rollback at any depth aborts
/// the whole logical transaction and resets the depth to zero.
use crate::core::db::factory::Driver;
use crate::core::db::statement::Statement;
use crate::core::db::value::Value;
use crate::core::{DbError, Result};
use crate::events::{self, Event, EventBus, TransactionOperation};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Display name used for the unnamed connection.
pub const DEFAULT_CONNECTION_NAME: &str = "default";

struct ConnectionInner {
    name: Option<String>,
    handle: rusqlite::Connection,
    driver: Driver,
    depth: Cell<usize>,
    native_open: Cell<bool>,
    events: RefCell<EventBus>,
}

/// A named handle to one database.
///
/// Cloning is cheap and yields another reference to the same handle; two
/// clones share transaction state. Use [`Connection::same_handle`] to test
/// identity.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    /// Wraps an already opened SQLite handle.
    ///
    /// An empty name is treated as the default connection.
    pub fn new(name: Option<&str>, handle: rusqlite::Connection) -> Self {
        Connection {
            inner: Rc::new(ConnectionInner {
                name: name.filter(|n| !n.is_empty()).map(str::to_string),
                handle,
                driver: Driver::Sqlite,
                depth: Cell::new(0),
                native_open: Cell::new(false),
                events: RefCell::new(EventBus::new()),
            }),
        }
    }

    /// Opens a private in-memory database without going through configuration.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Driver` if SQLite cannot allocate the database.
    pub fn open_in_memory(name: Option<&str>) -> Result<Self> {
        let handle = rusqlite::Connection::open_in_memory()?;
        Ok(Connection::new(name, handle))
    }

    /// Connection name; `None` denotes the default connection.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Name suitable for log lines and profile records.
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(DEFAULT_CONNECTION_NAME)
    }

    pub fn driver(&self) -> Driver {
        self.inner.driver
    }

    /// Returns `true` when both values refer to the same native handle.
    pub fn same_handle(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Direct access to the underlying driver handle.
    ///
    /// Use it for driver features the engine does not expose (custom
    /// functions, pragmas returning rows, backups). Issuing `BEGIN`/`COMMIT`
    /// through it bypasses the nesting bookkeeping.
    pub fn handle(&self) -> &rusqlite::Connection {
        &self.inner.handle
    }

    pub(crate) fn events(&self) -> EventBus {
        self.inner.events.borrow().clone()
    }

    pub(crate) fn attach_events(&self, bus: EventBus) {
        *self.inner.events.borrow_mut() = bus;
    }

    /// Compiles `sql` into a statement bound to this connection.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Driver` when SQLite rejects the statement.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        let parameter_count = {
            let stmt = self.inner.handle.prepare_cached(sql)?;
            stmt.parameter_count()
        };
        trace!(connection = self.display_name(), sql, "prepared statement");
        Ok(Statement::new(self.clone(), sql.to_string(), parameter_count))
    }

    /// Prepares and executes `sql` with positional `params`.
    ///
    /// The returned statement holds any result rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Statement> {
        let mut statement = self.prepare(sql)?;
        statement.execute(params)?;
        Ok(statement)
    }

    /// Executes a single ad-hoc statement and returns the affected row count.
    pub fn run(&self, sql: &str) -> Result<usize> {
        trace!(connection = self.display_name(), sql, "running statement");
        self.events().around(
            || Event::SqlExecuting {
                connection: self.name(),
                sql,
            },
            events::sql_executed,
            || self.inner.handle.execute(sql, []).map_err(DbError::from),
        )
    }

    /// Executes a script of semicolon-separated statements.
    pub fn run_batch(&self, sql: &str) -> Result<()> {
        trace!(connection = self.display_name(), sql, "running batch");
        self.events().around(
            || Event::SqlExecuting {
                connection: self.name(),
                sql,
            },
            events::sql_executed,
            || self.inner.handle.execute_batch(sql).map_err(DbError::from),
        )
    }

    /// Wraps `name` in the driver's identifier quotes.
    ///
    /// Embedded quote characters are doubled and dotted names are quoted per
    /// segment, so `main.docs` becomes `"main"."docs"`.
    pub fn quote_identifier(&self, name: &str) -> String {
        self.inner.driver.quote_identifier(name)
    }

    /// Row id of the most recent successful insert on this handle.
    pub fn last_insert_id(&self) -> i64 {
        self.inner.handle.last_insert_rowid()
    }

    /// Current logical nesting depth.
    pub fn transaction_depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// `true` while a logical transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// Opens a logical transaction, issuing a native begin at depth zero.
    pub fn begin_transaction(&self) -> Result<()> {
        let depth = self.inner.depth.get();
        if depth == 0 {
            self.begin_native()?;
        }
        self.inner.depth.set(depth + 1);
        debug!(connection = self.display_name(), depth = depth + 1, "begin transaction");
        Ok(())
    }

    /// Closes one nesting level; only the outermost level commits natively.
    ///
    /// # Errors
    ///
    /// Returns `DbError::TransactionState` when no transaction is open (for
    /// example after an inner rollback already ended it). If the native commit
    /// fails the depth is left unchanged so the caller can still roll back.
    pub fn commit(&self) -> Result<()> {
        let depth = self.inner.depth.get();
        if depth == 0 {
            return Err(DbError::TransactionState(format!(
                "commit on connection '{}' without an open transaction",
                self.display_name()
            )));
        }
        if depth == 1 {
            self.commit_native()?;
        }
        self.inner.depth.set(depth - 1);
        debug!(connection = self.display_name(), depth = depth - 1, "commit");
        Ok(())
    }

    /// Aborts the whole logical transaction, whatever the current depth.
    ///
    /// # Errors
    ///
    /// Returns `DbError::TransactionState` when no transaction is open. The
    /// depth is reset even if the native rollback reports an error.
    pub fn rollback(&self) -> Result<()> {
        let depth = self.inner.depth.get();
        if depth == 0 {
            return Err(DbError::TransactionState(format!(
                "rollback on connection '{}' without an open transaction",
                self.display_name()
            )));
        }
        let result = self.rollback_native();
        self.inner.depth.set(0);
        debug!(connection = self.display_name(), from_depth = depth, "rollback");
        result
    }

    pub(crate) fn begin_native(&self) -> Result<()> {
        self.transaction_primitive(TransactionOperation::Begin, "BEGIN")?;
        self.inner.native_open.set(true);
        Ok(())
    }

    pub(crate) fn commit_native(&self) -> Result<()> {
        self.transaction_primitive(TransactionOperation::Commit, "COMMIT")?;
        self.inner.native_open.set(false);
        Ok(())
    }

    pub(crate) fn rollback_native(&self) -> Result<()> {
        // SQLite rolls back on its own after some failures (SQLITE_FULL,
        // SQLITE_IOERR, ...); a second ROLLBACK would then be an error.
        let result = if self.inner.handle.is_autocommit() {
            Ok(())
        } else {
            self.transaction_primitive(TransactionOperation::Rollback, "ROLLBACK")
        };
        self.inner.native_open.set(false);
        result
    }

    /// `true` while a native transaction is open underneath the nesting.
    pub fn native_transaction_open(&self) -> bool {
        self.inner.native_open.get()
    }

    fn transaction_primitive(&self, operation: TransactionOperation, sql: &str) -> Result<()> {
        self.events().around(
            || Event::TransactionExecuting {
                connection: self.name(),
                operation,
            },
            events::transaction_executed,
            || self.inner.handle.execute_batch(sql).map_err(DbError::from),
        )
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.display_name())
            .field("driver", &self.inner.driver)
            .field("depth", &self.inner.depth.get())
            .field("native_open", &self.inner.native_open.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_connection() -> Connection {
        let conn = Connection::open_in_memory(None).unwrap();
        conn.run_batch("CREATE TABLE docs (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        conn
    }

    #[test]
    fn test_connection_naming() {
        assert_eq!(Connection::open_in_memory(None).unwrap().name(), None);
        assert_eq!(Connection::open_in_memory(Some("")).unwrap().name(), None);
        let backup = Connection::open_in_memory(Some("backup")).unwrap();
        assert_eq!(backup.name(), Some("backup"));
        assert_eq!(backup.display_name(), "backup");
    }

    #[test]
    fn test_quote_identifier() {
        let conn = Connection::open_in_memory(None).unwrap();
        assert_eq!(conn.quote_identifier("docs"), "\"docs\"");
        assert_eq!(conn.quote_identifier("main.docs"), "\"main\".\"docs\"");
        assert_eq!(conn.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(conn.quote_identifier("docs.*"), "\"docs\".*");
    }

    #[test]
    fn test_prepare_rejects_malformed_sql() {
        let conn = memory_connection();
        match conn.prepare("SELEC * FROM docs") {
            Err(DbError::Driver(_)) => {}
            other => panic!("Expected driver error, got {:?}", other.map(|s| s.sql().to_string())),
        }
    }

    #[test]
    fn test_run_and_last_insert_id() {
        let conn = memory_connection();
        let affected = conn.run("INSERT INTO docs (name) VALUES ('a')").unwrap();
        assert_eq!(affected, 1);
        assert_eq!(conn.last_insert_id(), 1);
    }

    #[test]
    fn test_nested_transactions_commit_once() {
        let conn = memory_connection();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        assert_eq!(conn.transaction_depth(), 2);

        conn.commit().unwrap();
        assert!(conn.in_transaction());
        assert!(!conn.handle().is_autocommit(), "native transaction must still be open");

        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.handle().is_autocommit());
        assert!(!conn.native_transaction_open());
    }

    #[test]
    fn test_rollback_at_any_depth_resets() {
        let conn = memory_connection();
        conn.begin_transaction().unwrap();
        conn.run("INSERT INTO docs (name) VALUES ('lost')").unwrap();
        conn.begin_transaction().unwrap();
        conn.rollback().unwrap();

        assert!(!conn.in_transaction());
        assert_eq!(conn.transaction_depth(), 0);
        let count: i64 = conn
            .handle()
            .query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_commit_without_transaction_is_state_error() {
        let conn = memory_connection();
        assert!(matches!(conn.commit(), Err(DbError::TransactionState(_))));
        assert!(matches!(conn.rollback(), Err(DbError::TransactionState(_))));
    }

    #[test]
    fn test_clones_share_transaction_state() {
        let conn = memory_connection();
        let other = conn.clone();
        conn.begin_transaction().unwrap();
        assert!(other.in_transaction());
        assert!(other.same_handle(&conn));
        other.rollback().unwrap();
        assert!(!conn.in_transaction());
    }
}
