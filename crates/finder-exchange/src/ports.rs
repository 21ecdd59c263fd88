//! Interfaces between the exchange core and the outside world.
//!
//! Stores are synchronous and must be safe to share across threads; async
//! callers run them on a blocking pool.

use finder_types::audit::{AuditQuery, AuditRecord};
use finder_types::directory::{PostSummary, PrivacySafeUser};
use finder_types::events::ExchangeEvent;
use finder_types::exchange::{ExchangeStatus, RequestRecord, RequestRole};
use finder_types::ids::{PostId, RequestId, UserId};
use finder_types::keys::EncryptionKey;

/// Failure reported by a store or collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A precondition on the stored state did not hold.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Encryption key pairs. At most one key is active at any time.
pub trait KeyStore: Send + Sync {
    /// Persist a new key. Keys are never deleted.
    fn save(&self, key: &EncryptionKey) -> StoreResult<()>;

    /// The active key, or `NotFound` when none exists yet.
    fn active(&self) -> StoreResult<EncryptionKey>;

    fn by_fingerprint(&self, fingerprint: &str) -> StoreResult<EncryptionKey>;

    /// All keys, oldest first.
    fn list(&self) -> StoreResult<Vec<EncryptionKey>>;

    fn deactivate(&self, fingerprint: &str) -> StoreResult<()>;

    /// Atomically make `fingerprint` the only active key.
    ///
    /// Succeeds only if the currently active key is `expected_previous`
    /// (`None` meaning no active key); otherwise returns `Conflict` and
    /// changes nothing.
    fn activate(&self, fingerprint: &str, expected_previous: Option<&str>) -> StoreResult<()>;
}

/// Append-only audit trail.
pub trait AuditLog: Send + Sync {
    fn append(&self, record: &AuditRecord) -> StoreResult<()>;

    /// Matching records, newest first, at most `query.effective_limit()`.
    fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>>;
}

/// Persisted contact exchange requests.
pub trait RequestRepository: Send + Sync {
    fn insert(&self, record: &RequestRecord) -> StoreResult<()>;

    fn get(&self, id: &RequestId) -> StoreResult<RequestRecord>;

    /// Replace the stored request in one atomic write, provided its stored
    /// status is still `expected_status`. Otherwise `Conflict`.
    fn update(&self, record: &RequestRecord, expected_status: ExchangeStatus) -> StoreResult<()>;

    /// [`RequestRepository::update`] and an audit append as one unit: both
    /// are stored or neither is.
    fn update_with_audit(
        &self,
        record: &RequestRecord,
        expected_status: ExchangeStatus,
        audit: &AuditRecord,
    ) -> StoreResult<()>;

    /// Requests `user` takes part in, newest first.
    fn list_for_user(
        &self,
        user: &UserId,
        role: RequestRole,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<RequestRecord>>;

    /// Pending or approved requests with `expires_at < now`, oldest expiry first.
    fn due_for_expiry(&self, now: u64, limit: u32) -> StoreResult<Vec<RequestRecord>>;

    /// Expired requests still holding an encrypted payload.
    fn expired_with_contact(&self, limit: u32) -> StoreResult<Vec<RequestRecord>>;
}

/// Post lookup owned by the posts service.
pub trait PostDirectory: Send + Sync {
    fn post(&self, id: &PostId) -> StoreResult<PostSummary>;
}

/// User lookup owned by the accounts service.
pub trait UserDirectory: Send + Sync {
    fn privacy_safe_user(&self, id: &UserId) -> StoreResult<PrivacySafeUser>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Fire-and-forget sink for exchange events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ExchangeEvent) -> Result<(), PublishError>;
}
