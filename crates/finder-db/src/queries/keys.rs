//! Encryption key queries.

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

use finder_types::keys::EncryptionKey;

use super::{not_found, parse, time_column, to_sql_time, write_error};
use crate::{DbError, Result};

const COLUMNS: &str =
    "id, fingerprint, public_key, sealed_private_key, is_active, created_at, expires_at";

/// A key row as stored.
struct KeyRow {
    id: String,
    fingerprint: String,
    public_key: Vec<u8>,
    sealed_private_key: Vec<u8>,
    is_active: bool,
    created_at: u64,
    expires_at: Option<u64>,
}

impl KeyRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            fingerprint: row.get(1)?,
            public_key: row.get(2)?,
            sealed_private_key: row.get(3)?,
            is_active: row.get(4)?,
            created_at: time_column(row, 5)?,
            expires_at: match row.get::<_, Option<i64>>(6)? {
                Some(v) => Some(u64::try_from(v).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(6, v))?),
                None => None,
            },
        })
    }

    fn into_key(self) -> Result<EncryptionKey> {
        Ok(EncryptionKey {
            id: parse("id", &self.id)?,
            fingerprint: self.fingerprint,
            public_key: self.public_key,
            sealed_private_key: self.sealed_private_key,
            is_active: self.is_active,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// Insert a new key.
pub fn insert(conn: &Connection, key: &EncryptionKey) -> Result<()> {
    let created_at = to_sql_time("created_at", key.created_at)?;
    let expires_at = key
        .expires_at
        .map(|v| to_sql_time("expires_at", v))
        .transpose()?;
    conn.execute(
        &format!("INSERT INTO encryption_keys ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        rusqlite::params![
            key.id.to_string(),
            key.fingerprint,
            key.public_key,
            key.sealed_private_key,
            key.is_active,
            created_at,
            expires_at,
        ],
    )
    .map_err(|e| write_error("encryption_keys", e))?;
    Ok(())
}

pub fn active(conn: &Connection) -> Result<EncryptionKey> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM encryption_keys WHERE is_active = 1"),
        [],
        KeyRow::from_row,
    )
    .map_err(not_found("active key".into()))?
    .into_key()
}

pub fn by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<EncryptionKey> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM encryption_keys WHERE fingerprint = ?1"),
        [fingerprint],
        KeyRow::from_row,
    )
    .map_err(not_found(format!("key {fingerprint}")))?
    .into_key()
}

/// All keys, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<EncryptionKey>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM encryption_keys ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map([], KeyRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(KeyRow::into_key).collect()
}

pub fn deactivate(conn: &Connection, fingerprint: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE encryption_keys SET is_active = 0 WHERE fingerprint = ?1",
        [fingerprint],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("key {fingerprint}")));
    }
    Ok(())
}

/// Make `fingerprint` the only active key, provided the active key is still
/// `expected_previous`.
///
/// Runs in an `IMMEDIATE` transaction so the check and the swap cannot
/// interleave with another writer.
pub fn activate(conn: &mut Connection, fingerprint: &str, expected_previous: Option<&str>) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: Option<String> = tx
        .query_row(
            "SELECT fingerprint FROM encryption_keys WHERE is_active = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if current.as_deref() != expected_previous {
        return Err(DbError::Conflict(format!(
            "active key is {}, expected {}",
            current.as_deref().unwrap_or("none"),
            expected_previous.unwrap_or("none")
        )));
    }

    tx.execute("UPDATE encryption_keys SET is_active = 0 WHERE is_active = 1", [])?;
    let changed = tx.execute(
        "UPDATE encryption_keys SET is_active = 1 WHERE fingerprint = ?1",
        [fingerprint],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("key {fingerprint}")));
    }

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use finder_types::ids::KeyId;

    fn key(fingerprint: &str, created_at: u64) -> EncryptionKey {
        EncryptionKey {
            id: KeyId::new(),
            fingerprint: fingerprint.into(),
            public_key: vec![7; 32],
            sealed_private_key: vec![9; 60],
            is_active: false,
            created_at,
            expires_at: None,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let conn = crate::open_memory().expect("open");
        let k = key("aa", 1);
        insert(&conn, &k).expect("insert");
        assert_eq!(by_fingerprint(&conn, "aa").expect("get"), k);
        assert!(matches!(active(&conn), Err(DbError::NotFound(_))));
        assert!(matches!(by_fingerprint(&conn, "zz"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_fingerprint() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &key("aa", 1)).expect("insert");
        assert!(matches!(insert(&conn, &key("aa", 2)), Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_single_active_enforced_by_schema() {
        let conn = crate::open_memory().expect("open");
        let mut a = key("aa", 1);
        a.is_active = true;
        let mut b = key("bb", 2);
        b.is_active = true;
        insert(&conn, &a).expect("insert");
        assert!(matches!(insert(&conn, &b), Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_activate_compare_and_swap() {
        let mut conn = crate::open_memory().expect("open");
        insert(&conn, &key("aa", 1)).expect("insert");
        insert(&conn, &key("bb", 2)).expect("insert");

        activate(&mut conn, "aa", None).expect("first activation");
        assert_eq!(active(&conn).expect("active").fingerprint, "aa");

        assert!(matches!(activate(&mut conn, "bb", None), Err(DbError::Conflict(_))));
        assert_eq!(active(&conn).expect("active").fingerprint, "aa");

        activate(&mut conn, "bb", Some("aa")).expect("rotation");
        let keys = list(&conn).expect("list");
        assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
        assert_eq!(active(&conn).expect("active").fingerprint, "bb");
    }

    #[test]
    fn test_activate_unknown_rolls_back() {
        let mut conn = crate::open_memory().expect("open");
        insert(&conn, &key("aa", 1)).expect("insert");
        activate(&mut conn, "aa", None).expect("activate");

        assert!(matches!(
            activate(&mut conn, "missing", Some("aa")),
            Err(DbError::NotFound(_))
        ));
        assert_eq!(active(&conn).expect("still active").fingerprint, "aa");
    }

    #[test]
    fn test_deactivate() {
        let mut conn = crate::open_memory().expect("open");
        insert(&conn, &key("aa", 1)).expect("insert");
        activate(&mut conn, "aa", None).expect("activate");
        deactivate(&conn, "aa").expect("deactivate");
        assert!(matches!(active(&conn), Err(DbError::NotFound(_))));
        assert!(matches!(deactivate(&conn, "zz"), Err(DbError::NotFound(_))));
    }
}
