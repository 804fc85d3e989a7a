/// Statement Module
///
/// A [`Statement`] is one prepared SQL text bound to the [`Connection`] it was
/// prepared on. Executing it publishes the prepared-statement event pair and
/// buffers any result rows, which are then consumed through the fetch methods
/// or by iterating the statement.
use crate::core::db::connection::Connection;
use crate::core::db::value::{Row, Value};
use crate::core::{DbError, Result};
use crate::events::{self, Event};
use rusqlite::params_from_iter;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

pub struct Statement {
    connection: Connection,
    sql: String,
    bound: Vec<Option<Value>>,
    columns: Rc<[String]>,
    rows: VecDeque<Row>,
    row_count: usize,
    executed: bool,
}

impl Statement {
    pub(crate) fn new(connection: Connection, sql: String, parameter_count: usize) -> Self {
        Statement {
            connection,
            sql,
            bound: vec![None; parameter_count],
            columns: Rc::from(Vec::new()),
            rows: VecDeque::new(),
            row_count: 0,
            executed: false,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Number of `?` placeholders in the statement.
    pub fn parameter_count(&self) -> usize {
        self.bound.len()
    }

    /// Binds `value` to the 1-based placeholder `position`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Driver` if `position` is outside the statement's
    /// placeholders.
    pub fn bind(&mut self, position: usize, value: impl Into<Value>) -> Result<&mut Self> {
        if position == 0 || position > self.bound.len() {
            return Err(DbError::Driver(rusqlite::Error::InvalidParameterCount(
                position,
                self.bound.len(),
            )));
        }
        self.bound[position - 1] = Some(value.into());
        Ok(self)
    }

    /// Executes the statement.
    ///
    /// Non-empty `params` are used as-is; an empty slice executes with the
    /// values previously given to [`Statement::bind`]. Rows from an earlier
    /// execution that were not fetched are discarded.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Driver` with `InvalidParameterCount` when `params`
    /// is empty and a placeholder was never bound.
    pub fn execute(&mut self, params: &[Value]) -> Result<()> {
        let params = if params.is_empty() { self.bound_values()? } else { params.to_vec() };
        let connection = self.connection.clone();

        let (columns, rows, row_count) = connection.events().around(
            || Event::PreparedExecuting {
                connection: connection.name(),
                sql: &self.sql,
                params: &params,
            },
            events::prepared_executed,
            || run_prepared(&connection, &self.sql, &params),
        )?;

        self.columns = columns;
        self.rows = rows;
        self.row_count = row_count;
        self.executed = true;
        Ok(())
    }

    fn bound_values(&self) -> Result<Vec<Value>> {
        self.bound.iter().cloned().collect::<Option<Vec<_>>>().ok_or_else(|| {
            let given = self.bound.iter().filter(|value| value.is_some()).count();
            DbError::Driver(rusqlite::Error::InvalidParameterCount(given, self.bound.len()))
        })
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Column names of the last result set.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Next buffered row, if any.
    pub fn fetch_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// All remaining buffered rows.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }

    /// Value at `index` of the next row.
    pub fn fetch_column(&mut self, index: usize) -> Option<Value> {
        self.fetch_row().and_then(|row| row.into_values().into_iter().nth(index))
    }

    /// Rows affected by a data-changing statement, or rows returned by a query.
    pub fn row_count(&self) -> usize {
        self.row_count
    }
}

impl Iterator for Statement {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.fetch_row()
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("connection", &self.connection.display_name())
            .field("sql", &self.sql)
            .field("executed", &self.executed)
            .field("row_count", &self.row_count)
            .finish()
    }
}

fn run_prepared(connection: &Connection, sql: &str, params: &[Value]) -> Result<(Rc<[String]>, VecDeque<Row>, usize)> {
    let mut stmt = connection.handle().prepare_cached(sql)?;
    let columns: Rc<[String]> = stmt.column_names().into_iter().map(String::from).collect::<Vec<_>>().into();

    if columns.is_empty() {
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        return Ok((columns, VecDeque::new(), affected));
    }

    let column_count = columns.len();
    let mut buffered = VecDeque::new();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(Value::from(row.get_ref(i)?));
        }
        buffered.push_back(Row::new(Rc::clone(&columns), values));
    }
    let count = buffered.len();
    Ok((columns, buffered, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory(None).unwrap();
        conn.run_batch(
            "
            CREATE TABLE docs (id INTEGER PRIMARY KEY, name TEXT, decimal REAL);
            INSERT INTO docs VALUES (1, 'doc 1', 12.34);
            INSERT INTO docs VALUES (2, 'doc 2', 0);
        ",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_execute_with_params_and_fetch() {
        let conn = setup();
        let mut stmt = conn.prepare("SELECT id, name FROM docs WHERE id >= ? ORDER BY id").unwrap();
        stmt.execute(&[Value::Integer(1)]).unwrap();

        assert_eq!(stmt.column_names(), ["id", "name"]);
        assert_eq!(stmt.row_count(), 2);
        let first = stmt.fetch_row().unwrap();
        assert_eq!(first.get("name"), Some(&Value::Text("doc 1".into())));
        assert_eq!(stmt.fetch_all().len(), 1);
        assert!(stmt.fetch_row().is_none());
    }

    #[test]
    fn test_bind_then_execute() {
        let conn = setup();
        let mut stmt = conn.prepare("UPDATE docs SET name = ? WHERE id = ?").unwrap();
        assert_eq!(stmt.parameter_count(), 2);
        stmt.bind(1, "renamed").unwrap().bind(2, 2).unwrap();
        stmt.execute(&[]).unwrap();
        assert_eq!(stmt.row_count(), 1);

        assert!(stmt.bind(3, 1).is_err());
        assert!(stmt.bind(0, 1).is_err());
    }

    #[test]
    fn test_unbound_placeholder_is_an_error() {
        let conn = setup();
        let mut stmt = conn.prepare("UPDATE docs SET name = ? WHERE id = ?").unwrap();
        let err = stmt.execute(&[]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Driver(rusqlite::Error::InvalidParameterCount(0, 2))
        ));

        stmt.bind(1, "half").unwrap();
        assert!(stmt.execute(&[]).is_err());
        assert!(!stmt.is_executed());

        stmt.bind(2, 1).unwrap();
        stmt.execute(&[]).unwrap();
        assert_eq!(stmt.row_count(), 1);
    }

    #[test]
    fn test_explicit_null_binding_is_allowed() {
        let conn = setup();
        let mut stmt = conn.prepare("UPDATE docs SET name = ? WHERE id = 1").unwrap();
        stmt.bind(1, Value::Null).unwrap();
        stmt.execute(&[]).unwrap();
        assert_eq!(stmt.row_count(), 1);
    }

    #[test]
    fn test_statement_is_reusable() {
        let conn = setup();
        let mut stmt = conn.prepare("SELECT name FROM docs WHERE id = ?").unwrap();
        stmt.execute(&[Value::Integer(1)]).unwrap();
        assert_eq!(stmt.fetch_column(0), Some(Value::Text("doc 1".into())));
        stmt.execute(&[Value::Integer(2)]).unwrap();
        assert_eq!(stmt.fetch_column(0), Some(Value::Text("doc 2".into())));
    }

    #[test]
    fn test_iterate_statement() {
        let conn = setup();
        let stmt = conn.execute("SELECT id FROM docs ORDER BY id", &[]).unwrap();
        let ids: Vec<i64> = stmt.filter_map(|row| row.get_index(0).and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_constraint_violation_surfaces() {
        let conn = setup();
        let err = conn
            .execute("INSERT INTO docs (id, name) VALUES (?, ?)", &[Value::Integer(1), Value::from("dup")])
            .unwrap_err();
        assert!(matches!(err, DbError::Driver(_)));
    }
}
