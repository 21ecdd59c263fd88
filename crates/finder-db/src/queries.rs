//! Database query functions organized by table.

pub mod audit;
pub mod directory;
pub mod keys;
pub mod requests;
pub mod settings;

use std::fmt::Display;
use std::str::FromStr;

use rusqlite::Row;

use crate::{DbError, Result};

/// Parse a stored TEXT column back into its domain type.
pub(crate) fn parse<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| DbError::Serialization(format!("{column}: {e}")))
}

pub(crate) fn parse_opt<T>(column: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    value.map(|v| parse(column, &v)).transpose()
}

/// Timestamp as a column value. SQLite integers are signed 64-bit.
pub(crate) fn to_sql_time(column: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| DbError::OutOfRange(format!("{column}: {value}")))
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// Map a constraint failure on write to [`DbError::Constraint`].
pub(crate) fn write_error(what: &str, e: rusqlite::Error) -> DbError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, ref msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!(
                "{what}: {}",
                msg.as_deref().unwrap_or("constraint failed")
            ))
        }
        other => DbError::Sqlite(other),
    }
}

pub(crate) fn not_found(what: String) -> impl FnOnce(rusqlite::Error) -> DbError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(what),
        other => DbError::Sqlite(other),
    }
}
