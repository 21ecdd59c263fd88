//! Settings query functions.

use rusqlite::Connection;

use super::not_found;
use crate::{DbError, Result};

/// Hex Argon2id salt for the key-at-rest passphrase.
pub const KEK_SALT: &str = "kek_salt";

/// Get a setting value by key.
pub fn get(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .map_err(not_found(format!("setting '{key}'")))
}

/// Set a setting value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Value stored under `key`, or `init()` stored and returned if absent.
pub fn get_or_insert_with(conn: &Connection, key: &str, init: impl FnOnce() -> String) -> Result<String> {
    match get(conn, key) {
        Ok(v) => Ok(v),
        Err(DbError::NotFound(_)) => {
            let value = init();
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
            // Another process may have won the insert.
            get(conn, key)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_set_and_get() {
        let conn = test_db();
        set(&conn, "theme", "dark").expect("set");
        assert_eq!(get(&conn, "theme").expect("get"), "dark");
    }

    #[test]
    fn test_get_nonexistent() {
        let conn = test_db();
        assert!(matches!(get(&conn, "nonexistent"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_get_or_insert_keeps_first_value() {
        let conn = test_db();
        let first = get_or_insert_with(&conn, KEK_SALT, || "00ff".into()).expect("init");
        let second = get_or_insert_with(&conn, KEK_SALT, || "ffff".into()).expect("reuse");
        assert_eq!(first, "00ff");
        assert_eq!(second, "00ff");
    }
}
