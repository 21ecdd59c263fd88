//! Port implementations over one SQLite connection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use finder_exchange::ports::{
    AuditLog, KeyStore, PostDirectory, RequestRepository, StoreError, StoreResult, UserDirectory,
};
use finder_types::audit::{AuditQuery, AuditRecord};
use finder_types::directory::{PostSummary, PrivacySafeUser};
use finder_types::exchange::{ExchangeStatus, RequestRecord, RequestRole};
use finder_types::ids::{PostId, RequestId, UserId};
use finder_types::keys::EncryptionKey;

use crate::queries::{audit, directory, keys, requests};
use crate::Result;

/// Shared handle to the database.
///
/// Every port call takes the connection lock for its duration, so calls are
/// serialized within a process. Cross-process safety comes from SQLite
/// itself.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(crate::open(path)?))
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(crate::open_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> StoreResult<T> {
        let mut conn = self.lock()?;
        f(&mut conn).map_err(StoreError::from)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".into()))
    }

    pub fn upsert_post(&self, post: &PostSummary) -> StoreResult<()> {
        self.with_conn(|c| directory::upsert_post(c, post))
    }

    pub fn upsert_user(&self, user: &PrivacySafeUser) -> StoreResult<()> {
        self.with_conn(|c| directory::upsert_user(c, user))
    }
}

impl KeyStore for SqliteStore {
    fn save(&self, key: &EncryptionKey) -> StoreResult<()> {
        self.with_conn(|c| keys::insert(c, key))
    }

    fn active(&self) -> StoreResult<EncryptionKey> {
        self.with_conn(|c| keys::active(c))
    }

    fn by_fingerprint(&self, fingerprint: &str) -> StoreResult<EncryptionKey> {
        self.with_conn(|c| keys::by_fingerprint(c, fingerprint))
    }

    fn list(&self) -> StoreResult<Vec<EncryptionKey>> {
        self.with_conn(|c| keys::list(c))
    }

    fn deactivate(&self, fingerprint: &str) -> StoreResult<()> {
        self.with_conn(|c| keys::deactivate(c, fingerprint))
    }

    fn activate(&self, fingerprint: &str, expected_previous: Option<&str>) -> StoreResult<()> {
        self.with_conn(|c| keys::activate(c, fingerprint, expected_previous))
    }
}

impl AuditLog for SqliteStore {
    fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        self.with_conn(|c| audit::insert(c, record))
    }

    fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>> {
        self.with_conn(|c| audit::query(c, query))
    }
}

impl RequestRepository for SqliteStore {
    fn insert(&self, record: &RequestRecord) -> StoreResult<()> {
        self.with_conn(|c| requests::insert(c, record))
    }

    fn get(&self, id: &RequestId) -> StoreResult<RequestRecord> {
        self.with_conn(|c| requests::get(c, id))
    }

    fn update(&self, record: &RequestRecord, expected_status: ExchangeStatus) -> StoreResult<()> {
        self.with_conn(|c| requests::update(c, record, expected_status))
    }

    fn update_with_audit(
        &self,
        record: &RequestRecord,
        expected_status: ExchangeStatus,
        audit: &AuditRecord,
    ) -> StoreResult<()> {
        self.with_conn(|c| requests::update_with_audit(c, record, expected_status, audit))
    }

    fn list_for_user(
        &self,
        user: &UserId,
        role: RequestRole,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<RequestRecord>> {
        self.with_conn(|c| requests::list_for_user(c, user, role, limit, offset))
    }

    fn due_for_expiry(&self, now: u64, limit: u32) -> StoreResult<Vec<RequestRecord>> {
        self.with_conn(|c| requests::due_for_expiry(c, now, limit))
    }

    fn expired_with_contact(&self, limit: u32) -> StoreResult<Vec<RequestRecord>> {
        self.with_conn(|c| requests::expired_with_contact(c, limit))
    }
}

impl PostDirectory for SqliteStore {
    fn post(&self, id: &PostId) -> StoreResult<PostSummary> {
        self.with_conn(|c| directory::get_post(c, id))
    }
}

impl UserDirectory for SqliteStore {
    fn privacy_safe_user(&self, id: &UserId) -> StoreResult<PrivacySafeUser> {
        self.with_conn(|c| directory::get_user(c, id))
    }
}
