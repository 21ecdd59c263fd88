//! # finder-db
//!
//! SQLite persistence for the contact exchange subsystem.
//!
//! - WAL mode, foreign keys enforced
//! - All timestamps are Unix epoch seconds
//! - Schema version stored in `PRAGMA user_version`
//!
//! [`queries`] holds plain functions over a [`Connection`]; [`store`] wraps
//! a connection and implements the `finder-exchange` ports on top of them.

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

use std::path::Path;

use rusqlite::Connection;

use finder_exchange::StoreError;

pub use store::SqliteStore;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored value could not be mapped back to its domain type.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A value does not fit its column.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// A conditional write found the row in an unexpected state.
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => StoreError::NotFound(what),
            DbError::Constraint(what) | DbError::Conflict(what) => StoreError::Conflict(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Open or create the database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
