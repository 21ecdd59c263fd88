//! Contact exchange request queries.

use rusqlite::{Connection, Row, TransactionBehavior};

use finder_types::audit::AuditRecord;
use finder_types::contact::EncryptedContactInfo;
use finder_types::exchange::{ExchangeStatus, RequestRecord, RequestRole, VerificationDetails};
use finder_types::ids::{RequestId, UserId};

use super::{not_found, parse, parse_opt, time_column, to_sql_time, write_error};
use crate::{DbError, Result};

const COLUMNS: &str = "id, post_id, requester_user_id, owner_user_id, status, message,
     verification_required, verification_method, verification_question,
     verification_requirements, approval_type, denial_reason, denial_message,
     encrypted_contact_info, expires_at, created_at, updated_at";

/// A request row as stored, before mapping back to domain types.
#[derive(Debug, Clone)]
pub struct RequestRow {
    pub id: String,
    pub post_id: String,
    pub requester_user_id: String,
    pub owner_user_id: String,
    pub status: String,
    pub message: Option<String>,
    pub verification_required: bool,
    pub verification_method: Option<String>,
    pub verification_question: Option<String>,
    pub verification_requirements: Option<String>,
    pub approval_type: Option<String>,
    pub denial_reason: Option<String>,
    pub denial_message: Option<String>,
    pub encrypted_contact_info: Option<String>,
    pub expires_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            requester_user_id: row.get(2)?,
            owner_user_id: row.get(3)?,
            status: row.get(4)?,
            message: row.get(5)?,
            verification_required: row.get(6)?,
            verification_method: row.get(7)?,
            verification_question: row.get(8)?,
            verification_requirements: row.get(9)?,
            approval_type: row.get(10)?,
            denial_reason: row.get(11)?,
            denial_message: row.get(12)?,
            encrypted_contact_info: row.get(13)?,
            expires_at: time_column(row, 14)?,
            created_at: time_column(row, 15)?,
            updated_at: time_column(row, 16)?,
        })
    }

    fn from_record(record: &RequestRecord) -> Result<Self> {
        let details = record.verification_details.as_ref();
        let requirements = details
            .map(|d| serde_json::to_string(&d.requirements))
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let contact = record
            .encrypted_contact_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(Self {
            id: record.id.to_string(),
            post_id: record.post_id.to_string(),
            requester_user_id: record.requester_id.to_string(),
            owner_user_id: record.owner_id.to_string(),
            status: record.status.to_string(),
            message: record.message.clone(),
            verification_required: record.verification_required,
            verification_method: details.map(|d| d.method.to_string()),
            verification_question: details.and_then(|d| d.question.clone()),
            verification_requirements: requirements,
            approval_type: record.approval_type.map(|a| a.to_string()),
            denial_reason: record.denial_reason.map(|r| r.to_string()),
            denial_message: record.denial_message.clone(),
            encrypted_contact_info: contact,
            expires_at: record.expires_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn into_record(self) -> Result<RequestRecord> {
        let verification_details = match self.verification_method {
            Some(method) => Some(VerificationDetails {
                method: parse("verification_method", &method)?,
                question: self.verification_question,
                requirements: match self.verification_requirements {
                    Some(json) => serde_json::from_str(&json)
                        .map_err(|e| DbError::Serialization(format!("verification_requirements: {e}")))?,
                    None => Vec::new(),
                },
            }),
            None => None,
        };
        let encrypted_contact_info = self
            .encrypted_contact_info
            .map(|json| serde_json::from_str::<EncryptedContactInfo>(&json))
            .transpose()
            .map_err(|e| DbError::Serialization(format!("encrypted_contact_info: {e}")))?;

        Ok(RequestRecord {
            id: parse("id", &self.id)?,
            post_id: parse("post_id", &self.post_id)?,
            requester_id: parse("requester_user_id", &self.requester_user_id)?,
            owner_id: parse("owner_user_id", &self.owner_user_id)?,
            status: parse("status", &self.status)?,
            message: self.message,
            verification_required: self.verification_required,
            verification_details,
            approval_type: parse_opt("approval_type", self.approval_type)?,
            denial_reason: parse_opt("denial_reason", self.denial_reason)?,
            denial_message: self.denial_message,
            encrypted_contact_info,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn collect(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<RequestRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, RequestRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(RequestRow::into_record).collect()
}

/// Insert a new request.
pub fn insert(conn: &Connection, record: &RequestRecord) -> Result<()> {
    let row = RequestRow::from_record(record)?;
    let expires_at = to_sql_time("expires_at", row.expires_at)?;
    let created_at = to_sql_time("created_at", row.created_at)?;
    let updated_at = to_sql_time("updated_at", row.updated_at)?;
    conn.execute(
        &format!(
            "INSERT INTO contact_exchange_requests ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        rusqlite::params![
            row.id,
            row.post_id,
            row.requester_user_id,
            row.owner_user_id,
            row.status,
            row.message,
            row.verification_required,
            row.verification_method,
            row.verification_question,
            row.verification_requirements,
            row.approval_type,
            row.denial_reason,
            row.denial_message,
            row.encrypted_contact_info,
            expires_at,
            created_at,
            updated_at,
        ],
    )
    .map_err(|e| write_error("contact_exchange_requests", e))?;
    Ok(())
}

/// Get a request by id.
pub fn get(conn: &Connection, id: &RequestId) -> Result<RequestRecord> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM contact_exchange_requests WHERE id = ?1"),
        [id.to_string()],
        RequestRow::from_row,
    )
    .map_err(not_found(format!("request {id}")))?
    .into_record()
}

/// Overwrite the mutable columns of a request whose stored status is still
/// `expected_status`.
///
/// Returns [`DbError::Conflict`] when the status moved underneath the caller.
pub fn update(conn: &Connection, record: &RequestRecord, expected_status: ExchangeStatus) -> Result<()> {
    let row = RequestRow::from_record(record)?;
    let updated_at = to_sql_time("updated_at", row.updated_at)?;
    let changed = conn
        .execute(
            "UPDATE contact_exchange_requests
             SET status = ?3, approval_type = ?4, denial_reason = ?5, denial_message = ?6,
                 encrypted_contact_info = ?7, updated_at = ?8
             WHERE id = ?1 AND status = ?2",
            rusqlite::params![
                row.id,
                expected_status.as_str(),
                row.status,
                row.approval_type,
                row.denial_reason,
                row.denial_message,
                row.encrypted_contact_info,
                updated_at,
            ],
        )
        .map_err(|e| write_error("contact_exchange_requests", e))?;

    if changed == 0 {
        let current = get(conn, &record.id)?;
        return Err(DbError::Conflict(format!(
            "request {} is {}, expected {expected_status}",
            record.id, current.status
        )));
    }
    Ok(())
}

/// [`update`] plus one audit row, committed together or not at all.
pub fn update_with_audit(
    conn: &mut Connection,
    record: &RequestRecord,
    expected_status: ExchangeStatus,
    audit: &AuditRecord,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    update(&tx, record, expected_status)?;
    super::audit::insert(&tx, audit)?;
    tx.commit()?;
    Ok(())
}

/// Requests `user` takes part in, newest first.
pub fn list_for_user(
    conn: &Connection,
    user: &UserId,
    role: RequestRole,
    limit: u32,
    offset: u32,
) -> Result<Vec<RequestRecord>> {
    let filter = match role {
        RequestRole::Requester => "requester_user_id = ?1",
        RequestRole::Owner => "owner_user_id = ?1",
        RequestRole::Any => "(requester_user_id = ?1 OR owner_user_id = ?1)",
    };
    collect(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM contact_exchange_requests
             WHERE {filter}
             ORDER BY created_at DESC, id
             LIMIT ?2 OFFSET ?3"
        ),
        rusqlite::params![user.to_string(), limit, offset],
    )
}

/// Pending or approved requests past their expiry, oldest expiry first.
pub fn due_for_expiry(conn: &Connection, now: u64, limit: u32) -> Result<Vec<RequestRecord>> {
    collect(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM contact_exchange_requests
             WHERE status IN ('pending', 'approved') AND expires_at < ?1
             ORDER BY expires_at, id
             LIMIT ?2"
        ),
        rusqlite::params![to_sql_time("now", now)?, limit],
    )
}

/// Expired requests still holding an encrypted payload.
pub fn expired_with_contact(conn: &Connection, limit: u32) -> Result<Vec<RequestRecord>> {
    collect(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM contact_exchange_requests
             WHERE status = 'expired' AND encrypted_contact_info IS NOT NULL
             ORDER BY updated_at, id
             LIMIT ?1"
        ),
        [limit],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::directory;
    use finder_types::contact::ContactMethod;
    use finder_types::directory::{PostKind, PostStatus, PostSummary};
    use finder_types::exchange::{ApprovalType, VerificationMethod};
    use finder_types::ids::PostId;

    fn test_db() -> (Connection, PostId, UserId) {
        let conn = crate::open_memory().expect("open test db");
        let post = PostSummary {
            id: PostId::new(),
            title: "Found keys".into(),
            kind: PostKind::Found,
            status: PostStatus::Active,
            owner_id: UserId::new(),
            created_at: 100,
        };
        directory::upsert_post(&conn, &post).expect("post");
        (conn, post.id, post.owner_id)
    }

    fn record(post_id: PostId, owner: UserId, created_at: u64) -> RequestRecord {
        RequestRecord {
            id: RequestId::new(),
            post_id,
            requester_id: UserId::new(),
            owner_id: owner,
            status: ExchangeStatus::Pending,
            message: Some("Those are mine".into()),
            verification_required: true,
            verification_details: Some(VerificationDetails {
                method: VerificationMethod::SecurityQuestion,
                question: Some("What is on the key ring?".into()),
                requirements: vec!["describe the fob".into()],
            }),
            approval_type: None,
            denial_reason: None,
            denial_message: None,
            encrypted_contact_info: None,
            expires_at: created_at + 3600,
            created_at,
            updated_at: created_at,
        }
    }

    fn payload() -> EncryptedContactInfo {
        EncryptedContactInfo {
            ciphertext: "AQ==".into(),
            key_fingerprint: "ab".repeat(32),
            preferred_method: ContactMethod::Email,
            restrictions: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let (conn, post, owner) = test_db();
        let rec = record(post, owner, 1_000);
        insert(&conn, &rec).expect("insert");
        assert_eq!(get(&conn, &rec.id).expect("get"), rec);
    }

    #[test]
    fn test_get_missing() {
        let (conn, _, _) = test_db();
        assert!(matches!(get(&conn, &RequestId::new()), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_constraints() {
        let (conn, post, owner) = test_db();

        let mut own = record(post, owner, 1_000);
        own.requester_id = owner;
        assert!(matches!(insert(&conn, &own), Err(DbError::Constraint(_))));

        let mut backwards = record(post, owner, 1_000);
        backwards.expires_at = 1_000;
        assert!(matches!(insert(&conn, &backwards), Err(DbError::Constraint(_))));

        let mut pending_with_payload = record(post, owner, 1_000);
        pending_with_payload.encrypted_contact_info = Some(payload());
        assert!(matches!(
            insert(&conn, &pending_with_payload),
            Err(DbError::Constraint(_))
        ));

        let orphan = record(PostId::new(), owner, 1_000);
        assert!(matches!(insert(&conn, &orphan), Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_timestamps_beyond_sqlite_range() {
        let (conn, post, owner) = test_db();
        let mut far = record(post, owner, 1_000);
        far.expires_at = u64::MAX - 1;
        assert!(matches!(insert(&conn, &far), Err(DbError::OutOfRange(_))));
        assert!(matches!(get(&conn, &far.id), Err(DbError::NotFound(_))));

        conn.execute(
            "INSERT INTO contact_exchange_requests
                 (id, post_id, requester_user_id, owner_user_id, status,
                  verification_required, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, -1, -5, -5)",
            rusqlite::params![
                far.id.to_string(),
                post.to_string(),
                far.requester_id.to_string(),
                owner.to_string(),
            ],
        )
        .expect("raw insert");
        assert!(matches!(get(&conn, &far.id), Err(DbError::Sqlite(_))));
    }

    #[test]
    fn test_update_with_audit_commits_together() {
        use finder_types::audit::{AuditOperation, AuditQuery, ClientMetadata};
        use finder_types::ids::AuditId;

        let (mut conn, post, owner) = test_db();
        let rec = record(post, owner, 1_000);
        insert(&conn, &rec).expect("insert");

        let mut approved = rec.clone();
        approved.status = ExchangeStatus::Approved;
        approved.approval_type = Some(ApprovalType::FullContact);
        approved.encrypted_contact_info = Some(payload());
        approved.updated_at = 1_100;
        let entry = AuditRecord {
            id: AuditId::new(),
            operation: AuditOperation::Encrypt,
            user_id: owner,
            request_id: Some(rec.id),
            key_fingerprint: "ab".repeat(32),
            success: true,
            error_message: None,
            timestamp: 1_100,
            client: ClientMetadata::default(),
        };
        let trail = |conn: &Connection| {
            crate::queries::audit::query(conn, &AuditQuery::for_request(rec.id)).expect("audit")
        };

        // The audit row is rejected (duplicate id), so the update rolls back.
        crate::queries::audit::insert(&conn, &entry).expect("seed audit row");
        assert!(matches!(
            update_with_audit(&mut conn, &approved, ExchangeStatus::Pending, &entry),
            Err(DbError::Constraint(_))
        ));
        assert_eq!(get(&conn, &rec.id).expect("get"), rec);
        assert_eq!(trail(&conn).len(), 1);

        // A stale status writes nothing either.
        let fresh = AuditRecord {
            id: AuditId::new(),
            ..entry.clone()
        };
        assert!(matches!(
            update_with_audit(&mut conn, &approved, ExchangeStatus::Denied, &fresh),
            Err(DbError::Conflict(_))
        ));
        assert_eq!(trail(&conn).len(), 1);

        update_with_audit(&mut conn, &approved, ExchangeStatus::Pending, &fresh).expect("commit");
        assert_eq!(get(&conn, &rec.id).expect("get"), approved);
        assert_eq!(trail(&conn)[0], fresh);
    }

    #[test]
    fn test_conditional_update() {
        let (conn, post, owner) = test_db();
        let rec = record(post, owner, 1_000);
        insert(&conn, &rec).expect("insert");

        let mut approved = rec.clone();
        approved.status = ExchangeStatus::Approved;
        approved.approval_type = Some(ApprovalType::FullContact);
        approved.encrypted_contact_info = Some(payload());
        approved.updated_at = 1_100;
        update(&conn, &approved, ExchangeStatus::Pending).expect("update");
        assert_eq!(get(&conn, &rec.id).expect("get"), approved);

        // A second writer that also loaded it as pending loses.
        let mut denied = rec.clone();
        denied.status = ExchangeStatus::Denied;
        assert!(matches!(
            update(&conn, &denied, ExchangeStatus::Pending),
            Err(DbError::Conflict(_))
        ));
        assert_eq!(get(&conn, &rec.id).expect("get").status, ExchangeStatus::Approved);
    }

    #[test]
    fn test_list_for_user() {
        let (conn, post, owner) = test_db();
        let older = record(post, owner, 1_000);
        let mut newer = record(post, owner, 2_000);
        newer.requester_id = older.requester_id;
        insert(&conn, &older).expect("insert");
        insert(&conn, &newer).expect("insert");

        let mine = list_for_user(&conn, &older.requester_id, RequestRole::Requester, 10, 0)
            .expect("list");
        assert_eq!(mine.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        assert!(list_for_user(&conn, &older.requester_id, RequestRole::Owner, 10, 0)
            .expect("list")
            .is_empty());
        assert_eq!(
            list_for_user(&conn, &owner, RequestRole::Any, 1, 1).expect("list")[0].id,
            older.id
        );
    }

    #[test]
    fn test_sweep_queries() {
        let (conn, post, owner) = test_db();
        let due = record(post, owner, 1_000);
        let fresh = record(post, owner, 10_000);
        insert(&conn, &due).expect("insert");
        insert(&conn, &fresh).expect("insert");

        let now = due.expires_at + 1;
        let found = due_for_expiry(&conn, now, 10).expect("due");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
        // Strictly past expiry only.
        assert!(due_for_expiry(&conn, due.expires_at, 10).expect("due").is_empty());

        let mut approved = due.clone();
        approved.status = ExchangeStatus::Approved;
        approved.encrypted_contact_info = Some(payload());
        update(&conn, &approved, ExchangeStatus::Pending).expect("approve");
        let mut expired = approved.clone();
        expired.status = ExchangeStatus::Expired;
        update(&conn, &expired, ExchangeStatus::Approved).expect("expire");

        let holding = expired_with_contact(&conn, 10).expect("holding");
        assert_eq!(holding.len(), 1);

        let mut purged = expired.clone();
        purged.encrypted_contact_info = None;
        update(&conn, &purged, ExchangeStatus::Expired).expect("purge");
        assert!(expired_with_contact(&conn, 10).expect("holding").is_empty());
    }
}
