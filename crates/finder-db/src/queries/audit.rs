//! Audit log queries. The table is insert-only.

use rusqlite::{Connection, Row};

use finder_types::audit::{AuditQuery, AuditRecord, ClientMetadata};

use super::{parse, parse_opt, time_column, to_sql_time, write_error};
use crate::Result;

const COLUMNS: &str = "id, operation, user_id, request_id, key_fingerprint, success,
     error_message, timestamp, ip_address, user_agent";

struct AuditRow {
    id: String,
    operation: String,
    user_id: String,
    request_id: Option<String>,
    key_fingerprint: String,
    success: bool,
    error_message: Option<String>,
    timestamp: u64,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation: row.get(1)?,
            user_id: row.get(2)?,
            request_id: row.get(3)?,
            key_fingerprint: row.get(4)?,
            success: row.get(5)?,
            error_message: row.get(6)?,
            timestamp: time_column(row, 7)?,
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<AuditRecord> {
        Ok(AuditRecord {
            id: parse("id", &self.id)?,
            operation: parse("operation", &self.operation)?,
            user_id: parse("user_id", &self.user_id)?,
            request_id: parse_opt("request_id", self.request_id)?,
            key_fingerprint: self.key_fingerprint,
            success: self.success,
            error_message: self.error_message,
            timestamp: self.timestamp,
            client: ClientMetadata {
                ip_address: self.ip_address,
                user_agent: self.user_agent,
            },
        })
    }
}

/// Append one record.
pub fn insert(conn: &Connection, record: &AuditRecord) -> Result<()> {
    let timestamp = to_sql_time("timestamp", record.timestamp)?;
    conn.execute(
        &format!(
            "INSERT INTO encryption_audit_logs ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        rusqlite::params![
            record.id.to_string(),
            record.operation.as_str(),
            record.user_id.to_string(),
            record.request_id.map(|r| r.to_string()),
            record.key_fingerprint,
            record.success,
            record.error_message,
            timestamp,
            record.client.ip_address,
            record.client.user_agent,
        ],
    )
    .map_err(|e| write_error("encryption_audit_logs", e))?;
    Ok(())
}

/// Records matching `query`, newest first.
pub fn query(conn: &Connection, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM encryption_audit_logs
         WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR request_id = ?2)
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                query.user_id.map(|u| u.to_string()),
                query.request_id.map(|r| r.to_string()),
                query.effective_limit(),
            ],
            AuditRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(AuditRow::into_record).collect()
}
