//! SQL builders for the engine's CRUD and aggregate operations.
//!
//! Every builder is pure: it takes the driver (for identifier quoting) and
//! returns the statement text together with its positional parameters.
//! Builders that take a predicate fail only when the predicate cannot render.
//! Table and column names are always quoted; raw predicate fragments are not.
use super::predicate::Predicate;
use crate::core::db::{ColumnMap, Driver, Value};
use crate::core::Result;

/// SQL aggregate functions supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Min,
    Max,
    Average,
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Average => "AVG",
        }
    }
}

/// A built statement.
pub(crate) type Built = (String, Vec<Value>);

pub(crate) fn select(driver: Driver, table: &str, filter: &Predicate, columns: Option<&[&str]>) -> Result<Built> {
    let projection = match columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| driver.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let (where_clause, params) = Predicate::where_clause(Some(filter), driver)?;
    Ok((
        format!("SELECT {} FROM {}{}", projection, driver.quote_identifier(table), where_clause),
        params,
    ))
}

/// `column` is ignored for [`Aggregate::Count`], which always counts rows.
pub(crate) fn aggregate(
    driver: Driver,
    function: Aggregate,
    table: &str,
    column: &str,
    filter: Option<&Predicate>,
) -> Result<Built> {
    let argument = match function {
        Aggregate::Count => "*".to_string(),
        _ => driver.quote_identifier(column),
    };
    let (where_clause, params) = Predicate::where_clause(filter, driver)?;
    Ok((
        format!(
            "SELECT {}({}) FROM {}{}",
            function.function(),
            argument,
            driver.quote_identifier(table),
            where_clause
        ),
        params,
    ))
}

/// Multi-row insert. All rows must have `columns.len()` values.
pub(crate) fn insert_rows(driver: Driver, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Built {
    let table = driver.quote_identifier(table);
    if columns.is_empty() {
        return (format!("INSERT INTO {} DEFAULT VALUES", table), Vec::new());
    }
    let column_list = columns
        .iter()
        .map(|c| driver.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let tuples = vec![placeholders.as_str(); rows.len()].join(", ");
    let params = rows.iter().flat_map(|row| row.iter().cloned()).collect();
    (format!("INSERT INTO {} ({}) VALUES {}", table, column_list, tuples), params)
}

pub(crate) fn insert(driver: Driver, table: &str, row: &ColumnMap) -> Built {
    let columns: Vec<String> = row.keys().cloned().collect();
    let values: Vec<Value> = row.values().cloned().collect();
    if columns.is_empty() {
        insert_rows(driver, table, &columns, &[])
    } else {
        insert_rows(driver, table, &columns, &[values])
    }
}

/// `Ok(None)` when `row` is empty; there is nothing to set.
pub(crate) fn update(driver: Driver, table: &str, row: &ColumnMap, filter: Option<&Predicate>) -> Result<Option<Built>> {
    if row.is_empty() {
        return Ok(None);
    }
    let assignments = row
        .keys()
        .map(|c| format!("{} = ?", driver.quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = row.values().cloned().collect();
    let (where_clause, filter_params) = Predicate::where_clause(filter, driver)?;
    params.extend(filter_params);
    Ok(Some((
        format!("UPDATE {} SET {}{}", driver.quote_identifier(table), assignments, where_clause),
        params,
    )))
}

pub(crate) fn delete(driver: Driver, table: &str, filter: Option<&Predicate>) -> Result<Built> {
    let (where_clause, params) = Predicate::where_clause(filter, driver)?;
    Ok((format!("DELETE FROM {}{}", driver.quote_identifier(table), where_clause), params))
}
