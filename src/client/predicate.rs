use crate::core::db::{ColumnMap, Driver, Value};
use crate::core::{DbError, Result};

/// Row filter used by the engine's query builder.
///
/// The two forms never mix within one call:
/// - [`Predicate::Columns`]: every column must equal its value (an empty map
///   matches all rows)
/// - [`Predicate::Raw`]: a SQL condition with positional `?` parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Columns(ColumnMap),
    Raw { sql: String, params: Vec<Value> },
}

impl Predicate {
    /// Matches every row.
    pub fn all() -> Self {
        Predicate::Columns(ColumnMap::new())
    }

    pub fn columns<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Predicate::Columns(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Single-column equality.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::columns([(column.into(), value.into())])
    }

    pub fn raw<I>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Predicate::Raw {
            sql: sql.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw condition without parameters.
    pub fn sql(sql: impl Into<String>) -> Self {
        Predicate::Raw {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// `true` for a column predicate with no columns.
    pub fn is_unfiltered(&self) -> bool {
        matches!(self, Predicate::Columns(map) if map.is_empty())
    }

    /// Renders the condition (without the `WHERE` keyword) and its parameters.
    ///
    /// Returns `Ok(None)` for a column predicate with no columns.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidPredicate` for a raw predicate whose SQL is
    /// blank. A raw predicate always filters; it never widens to every row.
    pub fn render(&self, driver: Driver) -> Result<Option<(String, Vec<Value>)>> {
        match self {
            Predicate::Columns(map) if map.is_empty() => Ok(None),
            Predicate::Columns(map) => {
                let mut params = Vec::with_capacity(map.len());
                let conditions: Vec<String> = map
                    .iter()
                    .map(|(column, value)| {
                        let quoted = driver.quote_identifier(column);
                        if value.is_null() {
                            format!("{} IS NULL", quoted)
                        } else {
                            params.push(value.clone());
                            format!("{} = ?", quoted)
                        }
                    })
                    .collect();
                Ok(Some((conditions.join(" AND "), params)))
            }
            Predicate::Raw { sql, params } => {
                let trimmed = sql.trim();
                if trimmed.is_empty() {
                    return Err(DbError::InvalidPredicate(format!(
                        "raw predicate has no condition ({} parameters given)",
                        params.len()
                    )));
                }
                Ok(Some((trimmed.to_string(), params.clone())))
            }
        }
    }

    /// Renders ` WHERE <condition>` or an empty string.
    pub(crate) fn where_clause(filter: Option<&Predicate>, driver: Driver) -> Result<(String, Vec<Value>)> {
        let rendered = match filter {
            Some(predicate) => predicate.render(driver)?,
            None => None,
        };
        Ok(match rendered {
            Some((condition, params)) => (format!(" WHERE {}", condition), params),
            None => (String::new(), Vec::new()),
        })
    }
}

impl From<ColumnMap> for Predicate {
    fn from(map: ColumnMap) -> Self {
        Predicate::Columns(map)
    }
}
