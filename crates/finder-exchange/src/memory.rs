//! In-memory implementations of every port.
//!
//! Suitable for tests and single-process deployments without persistence.
//! Each store guards its state with one mutex, which makes every operation,
//! including [`KeyStore::activate`], trivially atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use finder_types::audit::{AuditQuery, AuditRecord};
use finder_types::directory::{PostSummary, PrivacySafeUser};
use finder_types::events::ExchangeEvent;
use finder_types::exchange::{ExchangeStatus, RequestRecord, RequestRole};
use finder_types::ids::{PostId, RequestId, UserId};
use finder_types::keys::EncryptionKey;

use crate::ports::{
    AuditLog, EventPublisher, KeyStore, PostDirectory, PublishError, RequestRepository, StoreError,
    StoreResult, UserDirectory,
};

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("lock poisoned".into()))
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<Vec<EncryptionKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn save(&self, key: &EncryptionKey) -> StoreResult<()> {
        let mut keys = lock(&self.keys)?;
        if keys.iter().any(|k| k.fingerprint == key.fingerprint) {
            return Err(StoreError::Conflict(format!(
                "duplicate fingerprint {}",
                key.fingerprint
            )));
        }
        if key.is_active && keys.iter().any(|k| k.is_active) {
            return Err(StoreError::Conflict("an active key already exists".into()));
        }
        keys.push(key.clone());
        Ok(())
    }

    fn active(&self) -> StoreResult<EncryptionKey> {
        lock(&self.keys)?
            .iter()
            .find(|k| k.is_active)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("active key".into()))
    }

    fn by_fingerprint(&self, fingerprint: &str) -> StoreResult<EncryptionKey> {
        lock(&self.keys)?
            .iter()
            .find(|k| k.fingerprint == fingerprint)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("key {fingerprint}")))
    }

    fn list(&self) -> StoreResult<Vec<EncryptionKey>> {
        Ok(lock(&self.keys)?.clone())
    }

    fn deactivate(&self, fingerprint: &str) -> StoreResult<()> {
        let mut keys = lock(&self.keys)?;
        let key = keys
            .iter_mut()
            .find(|k| k.fingerprint == fingerprint)
            .ok_or_else(|| StoreError::NotFound(format!("key {fingerprint}")))?;
        key.is_active = false;
        Ok(())
    }

    fn activate(&self, fingerprint: &str, expected_previous: Option<&str>) -> StoreResult<()> {
        let mut keys = lock(&self.keys)?;

        let current = keys
            .iter()
            .find(|k| k.is_active)
            .map(|k| k.fingerprint.clone());
        if current.as_deref() != expected_previous {
            return Err(StoreError::Conflict(format!(
                "active key is {}, expected {}",
                current.as_deref().unwrap_or("none"),
                expected_previous.unwrap_or("none")
            )));
        }
        if !keys.iter().any(|k| k.fingerprint == fingerprint) {
            return Err(StoreError::NotFound(format!("key {fingerprint}")));
        }

        for key in keys.iter_mut() {
            key.is_active = key.fingerprint == fingerprint;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        lock(&self.records)?.push(record.clone());
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>> {
        let records = lock(&self.records)?;
        // Appended in time order, so reverse iteration is newest first.
        Ok(records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Requests, sharing an audit log for updates that carry an audit record.
pub struct MemoryRequestRepository {
    requests: Mutex<HashMap<RequestId, RequestRecord>>,
    audit: Arc<dyn AuditLog>,
}

impl MemoryRequestRepository {
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Replace the stored record if its status is `expected_status` and
    /// `before_write` succeeds, all under the lock.
    fn conditional(
        &self,
        record: &RequestRecord,
        expected_status: ExchangeStatus,
        before_write: impl FnOnce() -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut requests = lock(&self.requests)?;
        let stored = requests
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("request {}", record.id)))?;
        if stored.status != expected_status {
            return Err(StoreError::Conflict(format!(
                "request {} is {}, expected {}",
                record.id, stored.status, expected_status
            )));
        }
        before_write()?;
        *stored = record.clone();
        Ok(())
    }
}

impl RequestRepository for MemoryRequestRepository {
    fn insert(&self, record: &RequestRecord) -> StoreResult<()> {
        let mut requests = lock(&self.requests)?;
        if requests.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("request {} exists", record.id)));
        }
        requests.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &RequestId) -> StoreResult<RequestRecord> {
        lock(&self.requests)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("request {id}")))
    }

    fn update(&self, record: &RequestRecord, expected_status: ExchangeStatus) -> StoreResult<()> {
        self.conditional(record, expected_status, || Ok(()))
    }

    fn update_with_audit(
        &self,
        record: &RequestRecord,
        expected_status: ExchangeStatus,
        audit: &AuditRecord,
    ) -> StoreResult<()> {
        // The record is replaced only once the append has succeeded.
        self.conditional(record, expected_status, || self.audit.append(audit))
    }

    fn list_for_user(
        &self,
        user: &UserId,
        role: RequestRole,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<RequestRecord>> {
        let requests = lock(&self.requests)?;
        let mut matching: Vec<RequestRecord> = requests
            .values()
            .filter(|r| match role {
                RequestRole::Requester => r.requester_id == *user,
                RequestRole::Owner => r.owner_id == *user,
                RequestRole::Any => r.is_party(user),
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn due_for_expiry(&self, now: u64, limit: u32) -> StoreResult<Vec<RequestRecord>> {
        let requests = lock(&self.requests)?;
        let mut due: Vec<RequestRecord> = requests
            .values()
            .filter(|r| {
                matches!(r.status, ExchangeStatus::Pending | ExchangeStatus::Approved)
                    && r.expires_at < now
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    fn expired_with_contact(&self, limit: u32) -> StoreResult<Vec<RequestRecord>> {
        let requests = lock(&self.requests)?;
        let mut expired: Vec<RequestRecord> = requests
            .values()
            .filter(|r| r.status == ExchangeStatus::Expired && r.encrypted_contact_info.is_some())
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.updated_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }
}

// ---------------------------------------------------------------------------
// Directories and events
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPostDirectory {
    posts: Mutex<HashMap<PostId, PostSummary>>,
}

impl MemoryPostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, post: PostSummary) {
        if let Ok(mut posts) = self.posts.lock() {
            posts.insert(post.id, post);
        }
    }
}

impl PostDirectory for MemoryPostDirectory {
    fn post(&self, id: &PostId) -> StoreResult<PostSummary> {
        lock(&self.posts)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("post {id}")))
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<UserId, PrivacySafeUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: PrivacySafeUser) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.user_id, user);
        }
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn privacy_safe_user(&self, id: &UserId) -> StoreResult<PrivacySafeUser> {
        lock(&self.users)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }
}

/// Publisher that keeps every event it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ExchangeEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExchangeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: ExchangeEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .map_err(|_| PublishError("lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finder_types::ids::KeyId;

    fn key(fp: &str) -> EncryptionKey {
        EncryptionKey {
            id: KeyId::new(),
            fingerprint: fp.into(),
            public_key: vec![1; 32],
            sealed_private_key: vec![2; 60],
            is_active: false,
            created_at: 0,
            expires_at: None,
        }
    }

    #[test]
    fn test_activate_is_compare_and_swap() {
        let store = MemoryKeyStore::new();
        store.save(&key("a")).expect("save");
        store.save(&key("b")).expect("save");
        assert!(matches!(store.active(), Err(StoreError::NotFound(_))));

        store.activate("a", None).expect("first activation");
        assert_eq!(store.active().expect("active").fingerprint, "a");

        // A second caller that also saw "no active key" loses.
        assert!(matches!(store.activate("b", None), Err(StoreError::Conflict(_))));
        assert_eq!(store.active().expect("active").fingerprint, "a");

        store.activate("b", Some("a")).expect("rotate");
        let active: Vec<_> = store
            .list()
            .expect("list")
            .into_iter()
            .filter(|k| k.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].fingerprint, "b");
        assert!(!store.by_fingerprint("a").expect("old key").is_active);
    }

    #[test]
    fn test_deactivate_and_duplicates() {
        let store = MemoryKeyStore::new();
        store.save(&key("a")).expect("save");
        assert!(matches!(store.save(&key("a")), Err(StoreError::Conflict(_))));
        store.activate("a", None).expect("activate");
        store.deactivate("a").expect("deactivate");
        assert!(store.active().is_err());
        assert!(matches!(store.deactivate("zz"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_audit_query_newest_first() {
        use finder_types::audit::{AuditOperation, ClientMetadata};
        use finder_types::ids::AuditId;

        let log = MemoryAuditLog::new();
        let user = UserId::new();
        for ts in 0..5 {
            log.append(&AuditRecord {
                id: AuditId::new(),
                operation: AuditOperation::Decrypt,
                user_id: user,
                request_id: None,
                key_fingerprint: "fp".into(),
                success: true,
                error_message: None,
                timestamp: ts,
                client: ClientMetadata::default(),
            })
            .expect("append");
        }
        let mut query = AuditQuery::for_user(user);
        query.limit = Some(2);
        let page = log.query(&query).expect("query");
        assert_eq!(page.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![4, 3]);
        assert!(log.query(&AuditQuery::for_user(UserId::new())).expect("query").is_empty());
    }

    #[test]
    fn test_update_with_audit_is_all_or_nothing() {
        use finder_types::audit::{AuditOperation, ClientMetadata};
        use finder_types::exchange::ApprovalType;
        use finder_types::ids::{AuditId, PostId};

        struct FullDisk;

        impl AuditLog for FullDisk {
            fn append(&self, _: &AuditRecord) -> StoreResult<()> {
                Err(StoreError::Backend("disk full".into()))
            }
            fn query(&self, _: &AuditQuery) -> StoreResult<Vec<AuditRecord>> {
                Ok(Vec::new())
            }
        }

        let pending = RequestRecord {
            id: RequestId::new(),
            post_id: PostId::new(),
            requester_id: UserId::new(),
            owner_id: UserId::new(),
            status: ExchangeStatus::Pending,
            message: None,
            verification_required: false,
            verification_details: None,
            approval_type: None,
            denial_reason: None,
            denial_message: None,
            encrypted_contact_info: None,
            expires_at: 100,
            created_at: 0,
            updated_at: 0,
        };
        let approved = RequestRecord {
            status: ExchangeStatus::Approved,
            approval_type: Some(ApprovalType::FullContact),
            updated_at: 10,
            ..pending.clone()
        };
        let entry = AuditRecord {
            id: AuditId::new(),
            operation: AuditOperation::Encrypt,
            user_id: pending.owner_id,
            request_id: Some(pending.id),
            key_fingerprint: "fp".into(),
            success: true,
            error_message: None,
            timestamp: 10,
            client: ClientMetadata::default(),
        };

        let broken = MemoryRequestRepository::new(Arc::new(FullDisk));
        broken.insert(&pending).expect("insert");
        assert!(broken
            .update_with_audit(&approved, ExchangeStatus::Pending, &entry)
            .is_err());
        assert_eq!(broken.get(&pending.id).expect("get"), pending);

        let log = Arc::new(MemoryAuditLog::new());
        let repo = MemoryRequestRepository::new(log.clone());
        repo.insert(&pending).expect("insert");
        assert!(matches!(
            repo.update_with_audit(&approved, ExchangeStatus::Approved, &entry),
            Err(StoreError::Conflict(_))
        ));
        assert!(log.records().is_empty());

        repo.update_with_audit(&approved, ExchangeStatus::Pending, &entry)
            .expect("commit");
        assert_eq!(repo.get(&pending.id).expect("get"), approved);
        assert_eq!(log.records(), vec![entry]);
    }
}
