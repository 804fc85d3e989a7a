/// Client Engine
///
/// The [`Client`] owns the connection pool and the current-connection stack,
/// resolves the connection every operation runs on, and exposes the raw-SQL,
/// CRUD and aggregate surface of the crate.
///
/// ## Connection pool
///
/// At most one [`Connection`] lives in the pool per name (`None` is the
/// default connection). Connections are opened lazily through the
/// [`ConnectionFactory`] on first use and leave the pool only through
/// [`Client::remove_connection`].
///
/// ## Current connection
///
/// Operations that do not name a connection run on the *current* one. The
/// current name is the top of a stack: [`Client::connect`] replaces it and
/// [`Client::use_connection`] pushes a name for the extent of a closure.
pub mod crud;
pub mod predicate;
pub mod sql;

pub use predicate::Predicate;
pub use sql::Aggregate;

use crate::config::Config;
use crate::core::db::{Connection, ConnectionFactory, Row, Statement, Value};
use crate::core::{DbError, Result};
use crate::events::EventBus;
use crate::profiler::Profiler;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, trace};

/// DSN used when no configuration file is available.
pub const IN_MEMORY_DSN: &str = "sqlite::memory:";

thread_local! {
    static DEFAULT_CLIENT: OnceCell<RefCell<Client>> = OnceCell::new();
}

/// Database access engine.
pub struct Client {
    factory: ConnectionFactory,
    pool: HashMap<Option<String>, Connection>,
    // Never empty; the bottom entry is the name set by `connect`.
    current: Vec<Option<String>>,
    events: EventBus,
    profiler: Option<Rc<Profiler>>,
    import_batch_size: Option<usize>,
}

impl Client {
    /// Builds an engine from configuration. No connection is opened yet.
    pub fn new(config: Config) -> Self {
        let Config {
            database,
            connections,
            profiler,
            import,
        } = config;

        let mut client = Client {
            factory: ConnectionFactory::new(database, connections),
            pool: HashMap::new(),
            current: vec![None],
            events: EventBus::new(),
            profiler: None,
            import_batch_size: import.batch_size,
        };
        if let Some(profiler) = Profiler::from_config(&profiler) {
            client.attach_profiler(profiler);
        }
        client
    }

    /// An engine whose connections all open private in-memory databases.
    pub fn in_memory() -> Self {
        Client::new(Config::with_dsn(IN_MEMORY_DSN))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(Client::new(Config::from_toml_str(content)?))
    }

    /// Loads the TOML configuration at `path` and builds an engine from it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Client::new(Config::load(path)?))
    }

    /// Runs `f` against this thread's default engine.
    ///
    /// The engine is built on first use from the file at
    /// [`Config::default_path`] when it exists, otherwise with an in-memory
    /// default connection. Calling `with_default` from inside `f` panics.
    pub fn with_default<T, F>(f: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> T,
    {
        DEFAULT_CLIENT.with(|cell| {
            let client = cell.get_or_try_init(|| {
                let client = match Config::default_path().filter(|path| path.exists()) {
                    Some(path) => {
                        debug!(path = %path.display(), "building default client from configuration file");
                        Client::open(path)?
                    }
                    None => Client::in_memory(),
                };
                Ok::<_, DbError>(RefCell::new(client))
            })?;
            let mut client = client.borrow_mut();
            Ok(f(&mut client))
        })
    }

    /// Event bus shared by every pooled connection.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The most recently attached profiler.
    pub fn profiler(&self) -> Option<Rc<Profiler>> {
        self.profiler.clone()
    }

    /// Subscribes `profiler` to the engine's events.
    pub fn attach_profiler(&mut self, profiler: Profiler) -> Rc<Profiler> {
        let profiler = Rc::new(profiler);
        self.events.subscribe(profiler.clone());
        self.profiler = Some(profiler.clone());
        profiler
    }

    // Connection management

    /// Name of the current connection; `None` is the default connection.
    pub fn current_connection_name(&self) -> Option<&str> {
        self.current.last().and_then(|name| name.as_deref())
    }

    /// Display names of the pooled connections, sorted.
    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pool.values().map(|c| c.display_name().to_string()).collect();
        names.sort();
        names
    }

    /// Resolves or opens the connection `name` and makes it current.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Configuration` when no configuration covers `name`.
    pub fn connect(&mut self, name: Option<&str>) -> Result<Connection> {
        let name = normalize(name);
        let connection = self.pooled_or_open(name.as_deref())?;
        if let Some(top) = self.current.last_mut() {
            *top = name;
        }
        debug!(connection = connection.display_name(), "switched current connection");
        Ok(connection)
    }

    /// The current connection, opened on demand when `create_if_absent` is set.
    pub fn connection(&mut self, create_if_absent: bool) -> Result<Option<Connection>> {
        let name = self.current.last().cloned().flatten();
        if let Some(connection) = self.pool.get(&name) {
            return Ok(Some(connection.clone()));
        }
        if !create_if_absent {
            return Ok(None);
        }
        self.pooled_or_open(name.as_deref()).map(Some)
    }

    /// Installs a caller-supplied connection under its own name and makes it
    /// current, replacing any pooled connection with that name.
    pub fn set_connection(&mut self, connection: Connection) {
        connection.attach_events(self.events.clone());
        let name = connection.name().map(str::to_string);
        debug!(connection = connection.display_name(), "installed connection");
        if let Some(top) = self.current.last_mut() {
            *top = name.clone();
        }
        self.pool.insert(name, connection);
    }

    /// Evicts the pooled connection `name`. Absent names are ignored.
    pub fn remove_connection(&mut self, name: Option<&str>) -> Option<Connection> {
        let removed = self.pool.remove(&normalize(name));
        if let Some(connection) = &removed {
            debug!(connection = connection.display_name(), "evicted connection");
        }
        removed
    }

    /// Runs `body` with `name` as the current connection.
    ///
    /// The previous current connection is restored however `body` exits,
    /// including by panic.
    pub fn use_connection<T, F>(&mut self, name: Option<&str>, body: F) -> T
    where
        F: FnOnce(&mut Client) -> T,
    {
        let mut scope = ConnectionScope::enter(self, normalize(name));
        body(&mut scope)
    }

    fn pooled_or_open(&mut self, name: Option<&str>) -> Result<Connection> {
        let key = name.map(str::to_string);
        if let Some(connection) = self.pool.get(&key) {
            return Ok(connection.clone());
        }
        let connection = self.factory.create_connection(name)?;
        connection.attach_events(self.events.clone());
        debug!(connection = connection.display_name(), "pooled new connection");
        self.pool.insert(key, connection.clone());
        Ok(connection)
    }

    /// Default chunk size for bulk imports.
    pub(crate) fn import_batch_size(&self) -> Option<usize> {
        self.import_batch_size
    }

    pub(crate) fn current_connection(&mut self) -> Result<Connection> {
        let name = self.current.last().cloned().flatten();
        self.pooled_or_open(name.as_deref())
    }

    // Transactions

    /// Opens a (possibly nested) transaction on the current connection.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.current_connection()?.begin_transaction()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.current_connection()?.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.current_connection()?.rollback()
    }

    /// `true` if the current connection has an open transaction. Never opens
    /// a connection.
    pub fn in_transaction(&self) -> bool {
        let name = self.current.last().cloned().flatten();
        self.pool.get(&name).map_or(false, Connection::in_transaction)
    }

    // Raw SQL

    /// Executes `sql` and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Query` carrying `sql` when the driver rejects it.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        trace!(sql, params = params.len(), "execute");
        let connection = self.current_connection()?;
        connection
            .execute(sql, params)
            .map(|statement| statement.row_count())
            .map_err(|e| e.into_query(sql))
    }

    /// Prepares `sql` on the current connection and binds `params` without
    /// executing it.
    pub fn prepare(&mut self, sql: &str, params: &[Value]) -> Result<Statement> {
        let connection = self.current_connection()?;
        let mut statement = connection.prepare(sql).map_err(|e| e.into_query(sql))?;
        for (index, value) in params.iter().enumerate() {
            statement
                .bind(index + 1, value.clone())
                .map_err(|e| e.into_query(sql))?;
        }
        Ok(statement)
    }

    /// Executes a multi-statement script on the current connection.
    pub fn run_batch(&mut self, sql: &str) -> Result<()> {
        let connection = self.current_connection()?;
        connection.run_batch(sql).map_err(|e| e.into_query(sql))
    }

    /// Row id of the last insert on the current connection.
    pub fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.current_connection()?.last_insert_id())
    }

    /// Executes a query and returns the statement holding its rows.
    pub fn find(&mut self, sql: &str, params: &[Value]) -> Result<Statement> {
        trace!(sql, params = params.len(), "find");
        let connection = self.current_connection()?;
        connection.execute(sql, params).map_err(|e| e.into_query(sql))
    }

    pub fn find_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        Ok(self.find(sql, params)?.fetch_all())
    }

    /// First row of the result, if any.
    pub fn find_row(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.find(sql, params)?.fetch_row())
    }

    /// First column of the first row, if any.
    pub fn find_column(&mut self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        Ok(self.find(sql, params)?.fetch_column(0))
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::in_memory()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connections", &self.connection_names())
            .field("current", &self.current_connection_name())
            .field("events", &self.events)
            .field("profiler", &self.profiler)
            .finish()
    }
}

fn normalize(name: Option<&str>) -> Option<String> {
    name.filter(|n| !n.is_empty()).map(str::to_string)
}

/// Pops the pushed current-connection name when dropped.
struct ConnectionScope<'a> {
    client: &'a mut Client,
}

impl<'a> ConnectionScope<'a> {
    fn enter(client: &'a mut Client, name: Option<String>) -> Self {
        trace!(connection = name.as_deref().unwrap_or("default"), "entering connection scope");
        client.current.push(name);
        ConnectionScope { client }
    }
}

impl Drop for ConnectionScope<'_> {
    fn drop(&mut self) {
        if self.client.current.len() > 1 {
            self.client.current.pop();
        }
    }
}

impl Deref for ConnectionScope<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        &*self.client
    }
}

impl DerefMut for ConnectionScope<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        &mut *self.client
    }
}
