//! Bulk import
//!
//! [`Client::insert_all`] validates a whole batch before touching the
//! database, then sends it as multi-row `INSERT` statements of at most
//! `batch_size` rows each, all inside one transaction.
use crate::client::{sql, Client};
use crate::core::db::{ColumnMap, Value};
use crate::core::{DbError, Result};
use tracing::debug;

/// Rows of an import batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRows {
    /// Value lists; column names come from [`ImportOptions::column_names`].
    Positional(Vec<Vec<Value>>),
    /// Column-keyed rows; column names come from the first row.
    Keyed(Vec<ColumnMap>),
}

impl ImportRows {
    pub fn len(&self) -> usize {
        match self {
            ImportRows::Positional(rows) => rows.len(),
            ImportRows::Keyed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Vec<Value>>> for ImportRows {
    fn from(rows: Vec<Vec<Value>>) -> Self {
        ImportRows::Positional(rows)
    }
}

impl From<Vec<ColumnMap>> for ImportRows {
    fn from(rows: Vec<ColumnMap>) -> Self {
        ImportRows::Keyed(rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Required for positional rows. For keyed rows it fixes the column order.
    pub column_names: Option<Vec<String>>,
    /// Rows per statement; falls back to `import.batch_size` from
    /// configuration, then to the whole batch.
    pub batch_size: Option<usize>,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// A validated batch: one column list and rectangular rows.
#[derive(Debug)]
struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

fn invalid(message: String) -> DbError {
    DbError::InvalidBatch(message)
}

fn validate(rows: ImportRows, options: &ImportOptions) -> Result<Batch> {
    if options.batch_size == Some(0) {
        return Err(invalid("batch_size must be at least 1".to_string()));
    }
    match rows {
        ImportRows::Positional(rows) => {
            let columns = options
                .column_names
                .clone()
                .ok_or_else(|| invalid("positional rows require column_names".to_string()))?;
            if rows.is_empty() {
                return Ok(Batch { columns, rows });
            }
            let first = &rows[0];
            if first.is_empty() {
                return Err(invalid("row 0 has no values".to_string()));
            }
            if first.len() != columns.len() {
                return Err(invalid(format!(
                    "row 0 has {} values but {} column names were given",
                    first.len(),
                    columns.len()
                )));
            }
            if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != first.len()) {
                return Err(invalid(format!(
                    "row {} has {} values, expected {}",
                    index,
                    row.len(),
                    first.len()
                )));
            }
            Ok(Batch { columns, rows })
        }
        ImportRows::Keyed(rows) => {
            let Some(first) = rows.first() else {
                return Ok(Batch { columns: Vec::new(), rows: Vec::new() });
            };
            if first.is_empty() {
                return Err(invalid("row 0 has no columns".to_string()));
            }
            let columns = match &options.column_names {
                Some(names) => names.clone(),
                None => first.keys().cloned().collect(),
            };
            let mut values = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(invalid(format!(
                        "row {} has {} columns, expected {}",
                        index,
                        row.len(),
                        columns.len()
                    )));
                }
                let ordered = columns
                    .iter()
                    .map(|column| {
                        row.get(column)
                            .cloned()
                            .ok_or_else(|| invalid(format!("row {} is missing column '{}'", index, column)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                values.push(ordered);
            }
            Ok(Batch { columns, rows: values })
        }
    }
}

impl Client {
    /// Inserts every row of `rows` into `table` and returns the number of
    /// rows inserted.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidBatch` before any statement is issued when
    /// positional rows lack column names or any row's shape differs from the
    /// first row. A driver failure in any chunk rolls back the whole batch.
    pub fn insert_all(&mut self, table: &str, rows: impl Into<ImportRows>, options: &ImportOptions) -> Result<usize> {
        let batch = validate(rows.into(), options)?;
        if batch.rows.is_empty() {
            return Ok(0);
        }

        let chunk_size = options
            .batch_size
            .or(self.import_batch_size())
            .filter(|size| *size > 0)
            .unwrap_or(batch.rows.len());
        let driver = self.current_connection()?.driver();
        debug!(table, rows = batch.rows.len(), chunk_size, "importing batch");

        self.transaction(|client| {
            let mut inserted = 0;
            for chunk in batch.rows.chunks(chunk_size) {
                let (statement, params) = sql::insert_rows(driver, table, &batch.columns, chunk);
                inserted += client.execute(&statement, &params)?;
            }
            Ok(inserted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns;

    fn positional(rows: &[&[i64]]) -> ImportRows {
        ImportRows::Positional(
            rows.iter()
                .map(|row| row.iter().map(|v| Value::Integer(*v)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_positional_requires_column_names() {
        let err = validate(positional(&[&[1, 2]]), &ImportOptions::new()).unwrap_err();
        assert!(matches!(err, DbError::InvalidBatch(_)));
    }

    #[test]
    fn test_cardinality_mismatch_is_rejected() {
        let options = ImportOptions::new().with_column_names(["a", "b"]);
        let err = validate(positional(&[&[1, 2], &[3]]), &options).unwrap_err();
        assert!(err.to_string().contains("row 1"));
        assert!(validate(positional(&[&[1, 2, 3]]), &options).is_err());
    }

    #[test]
    fn test_keyed_rows_infer_columns() {
        let rows = ImportRows::Keyed(vec![
            columns! { "name" => "x", "id" => 1 },
            columns! { "id" => 2, "name" => "y" },
        ]);
        let batch = validate(rows, &ImportOptions::new()).unwrap();
        assert_eq!(batch.columns, vec!["id", "name"]);
        assert_eq!(batch.rows[1], vec![Value::Integer(2), Value::from("y")]);
    }

    #[test]
    fn test_keyed_rows_must_share_keys() {
        let rows = ImportRows::Keyed(vec![columns! { "id" => 1, "name" => "x" }, columns! { "id" => 2, "title" => "y" }]);
        let err = validate(rows, &ImportOptions::new()).unwrap_err();
        assert!(err.to_string().contains("missing column 'name'"));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let options = ImportOptions::new().with_column_names(["a"]).with_batch_size(0);
        assert!(validate(positional(&[&[1]]), &options).is_err());
    }
}
