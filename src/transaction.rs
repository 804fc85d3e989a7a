//! Transaction coordinator
//!
//! [`Client::transaction`] runs a closure inside a logical transaction on the
//! current connection. Calls nest through the connection's depth counter, so
//! only the outermost block commits natively and a failure at any level rolls
//! the whole transaction back exactly once.
use crate::client::Client;
use crate::core::db::Connection;
use crate::core::Result;
use tracing::{debug, warn};

impl Client {
    /// Runs `body` between a begin and a commit on the current connection.
    ///
    /// If `body` returns an error the transaction is rolled back (unless an
    /// inner block already did so) and the original error is returned
    /// unchanged. A panic inside `body` rolls back while unwinding.
    ///
    /// # Errors
    ///
    /// Besides errors from `body`, returns `DbError::TransactionState` when
    /// `body` succeeded but the transaction was already ended by an inner
    /// rollback.
    ///
    /// # Example
    ///
    /// ```
    /// use dbclient::{columns, Client};
    ///
    /// let mut client = Client::in_memory();
    /// client.run_batch("CREATE TABLE docs (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
    /// client
    ///     .transaction(|client| client.insert("docs", &columns! { "name" => "doc 1" }))
    ///     .unwrap();
    /// assert_eq!(client.count("docs", None).unwrap(), 1);
    /// ```
    pub fn transaction<T, F>(&mut self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T>,
    {
        let connection = self.current_connection()?;
        connection.begin_transaction()?;
        let guard = TransactionGuard::new(connection);
        let result = body(self);
        guard.finish(result)
    }
}

/// Rolls the captured connection back if dropped while still armed.
struct TransactionGuard {
    connection: Connection,
    armed: bool,
}

impl TransactionGuard {
    fn new(connection: Connection) -> Self {
        TransactionGuard { connection, armed: true }
    }

    fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.armed = false;
        match result {
            Ok(value) => {
                if let Err(e) = self.connection.commit() {
                    self.abort();
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(connection = self.connection.display_name(), error = %e, "transaction body failed");
                self.abort();
                Err(e)
            }
        }
    }

    fn abort(&self) {
        // An inner block may already have rolled back.
        if !self.connection.in_transaction() {
            return;
        }
        if let Err(e) = self.connection.rollback() {
            warn!(connection = self.connection.display_name(), error = %e, "rollback failed");
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(connection = self.connection.display_name(), "transaction abandoned, rolling back");
            self.abort();
        }
    }
}
