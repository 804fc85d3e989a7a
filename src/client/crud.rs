//! Table-level reads, writes and aggregates built from [`Predicate`]s.
use super::predicate::Predicate;
use super::sql::{self, Aggregate, Built};
use super::Client;
use crate::core::db::{ColumnMap, Row, Statement, Value};
use crate::core::Result;
use tracing::trace;

/// Primary key column used by the `*_by_id` operations.
pub const ID_COLUMN: &str = "id";

impl Client {
    /// Selects `columns` (all when `None`) from `table` where `filter` holds.
    ///
    /// An empty column predicate selects every row.
    pub fn find_by_columns(&mut self, table: &str, filter: &Predicate, columns: Option<&[&str]>) -> Result<Statement> {
        let driver = self.current_connection()?.driver();
        let (sql, params) = sql::select(driver, table, filter, columns)?;
        self.find(&sql, &params)
    }

    pub fn find_all_by_columns(&mut self, table: &str, filter: &Predicate, columns: Option<&[&str]>) -> Result<Vec<Row>> {
        Ok(self.find_by_columns(table, filter, columns)?.fetch_all())
    }

    pub fn find_row_by_columns(&mut self, table: &str, filter: &Predicate, columns: Option<&[&str]>) -> Result<Option<Row>> {
        Ok(self.find_by_columns(table, filter, columns)?.fetch_row())
    }

    /// First selected column of the first matching row.
    pub fn find_column_by_columns(
        &mut self,
        table: &str,
        filter: &Predicate,
        columns: Option<&[&str]>,
    ) -> Result<Option<Value>> {
        Ok(self.find_by_columns(table, filter, columns)?.fetch_column(0))
    }

    pub fn find_by_id(&mut self, table: &str, id: impl Into<Value>) -> Result<Statement> {
        self.find_by_columns(table, &Predicate::eq(ID_COLUMN, id), None)
    }

    pub fn find_row_by_id(&mut self, table: &str, id: impl Into<Value>) -> Result<Option<Row>> {
        self.find_row_by_columns(table, &Predicate::eq(ID_COLUMN, id), None)
    }

    /// Value of `column` in the row whose id is `id`.
    pub fn find_column_by_id(&mut self, table: &str, id: impl Into<Value>, column: &str) -> Result<Option<Value>> {
        self.find_column_by_columns(table, &Predicate::eq(ID_COLUMN, id), Some(&[column][..]))
    }

    /// Number of rows in `table` matching `filter` (all rows when `None`).
    pub fn count(&mut self, table: &str, filter: Option<&Predicate>) -> Result<i64> {
        let value = self.aggregate(Aggregate::Count, table, "", filter)?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Smallest value of `column`; `None` when no row matches.
    pub fn min(&mut self, table: &str, column: &str, filter: Option<&Predicate>) -> Result<Option<Value>> {
        let value = self.aggregate(Aggregate::Min, table, column, filter)?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    /// Largest value of `column`; `None` when no row matches.
    pub fn max(&mut self, table: &str, column: &str, filter: Option<&Predicate>) -> Result<Option<Value>> {
        let value = self.aggregate(Aggregate::Max, table, column, filter)?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    /// Arithmetic mean of `column`; `None` when no row matches.
    pub fn average(&mut self, table: &str, column: &str, filter: Option<&Predicate>) -> Result<Option<f64>> {
        let value = self.aggregate(Aggregate::Average, table, column, filter)?;
        Ok(value.as_f64())
    }

    fn aggregate(&mut self, function: Aggregate, table: &str, column: &str, filter: Option<&Predicate>) -> Result<Value> {
        let driver = self.current_connection()?.driver();
        let (sql, params) = sql::aggregate(driver, function, table, column, filter)?;
        Ok(self.find_column(&sql, &params)?.unwrap_or(Value::Null))
    }

    /// Inserts one row. An empty row inserts the table's default values.
    pub fn insert(&mut self, table: &str, row: &ColumnMap) -> Result<()> {
        let driver = self.current_connection()?.driver();
        self.write(sql::insert(driver, table, row))?;
        Ok(())
    }

    /// Sets the columns of `row` where `filter` holds; `None` updates every row.
    ///
    /// An empty `row` changes nothing and issues no statement.
    pub fn update(&mut self, table: &str, row: &ColumnMap, filter: Option<&Predicate>) -> Result<usize> {
        let driver = self.current_connection()?.driver();
        match sql::update(driver, table, row, filter)? {
            Some(built) => self.write(built),
            None => {
                trace!(table, "update with empty row skipped");
                Ok(0)
            }
        }
    }

    /// Returns `true` when a row with `id` was changed.
    pub fn update_by_id(&mut self, table: &str, row: &ColumnMap, id: impl Into<Value>) -> Result<bool> {
        Ok(self.update(table, row, Some(&Predicate::eq(ID_COLUMN, id)))? > 0)
    }

    /// Deletes the rows matching `filter`.
    ///
    /// `None` deletes every row of `table`. A raw predicate with blank SQL is
    /// rejected with `DbError::InvalidPredicate` and deletes nothing.
    pub fn delete(&mut self, table: &str, filter: Option<&Predicate>) -> Result<usize> {
        let driver = self.current_connection()?.driver();
        self.write(sql::delete(driver, table, filter)?)
    }

    /// Returns `true` when a row with `id` was deleted.
    pub fn delete_by_id(&mut self, table: &str, id: impl Into<Value>) -> Result<bool> {
        Ok(self.delete(table, Some(&Predicate::eq(ID_COLUMN, id)))? > 0)
    }

    fn write(&mut self, (sql, params): Built) -> Result<usize> {
        self.execute(&sql, &params)
    }
}
