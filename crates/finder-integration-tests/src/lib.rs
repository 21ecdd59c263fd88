//! Shared harness for the cross-crate scenarios under `tests/`.
//!
//! Every scenario runs the real service graph: the orchestrator and
//! encryption engine from `finder-exchange` over a `finder-db` SQLite store,
//! with a manual clock so expiry can be driven without waiting.
//!
//! ```sh
//! cargo test -p finder-integration-tests
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use finder_crypto::argon2id::KdfParams;
use finder_crypto::secret::{KekProtector, SecretProtector};
use finder_db::SqliteStore;
use finder_exchange::clock::ManualClock;
use finder_exchange::engine::EncryptionEngine;
use finder_exchange::memory::RecordingPublisher;
use finder_exchange::service::{ContactExchangeService, CreateRequest, ExchangeSettings, ServicePorts};
use finder_types::audit::ClientMetadata;
use finder_types::contact::{ContactInfo, ContactMethod};
use finder_types::directory::{PostKind, PostStatus, PostSummary, PrivacySafeUser};
use finder_types::exchange::{ApprovalType, RequestRecord};
use finder_types::ids::{PostId, UserId};

/// Simulated start time for deterministic runs.
pub const TEST_TIMESTAMP: u64 = 1_700_000_000;

/// Passphrase for key-at-rest protection in tests.
pub const TEST_PASSPHRASE: &[u8] = b"correct horse battery staple";

/// Fixed salt so separate processes derive the same key-encryption key.
pub const TEST_SALT: [u8; 16] = [7; 16];

/// Protector with cheap Argon2id parameters.
pub fn test_protector() -> anyhow::Result<Arc<dyn SecretProtector>> {
    Ok(Arc::new(KekProtector::from_passphrase_with(
        TEST_PASSPHRASE,
        &TEST_SALT,
        KdfParams::insecure_for_tests(),
    )?))
}

/// Unique path for a throwaway database file.
pub fn temp_db_path(label: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("finder-it-{label}-{}", PostId::new()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("finder.db"))
}

pub fn full_contact() -> ContactInfo {
    ContactInfo {
        email: Some("jordan@example.com".into()),
        phone: Some("+1 555 0100".into()),
        preferred_method: ContactMethod::Email,
        message: Some("Text first please".into()),
        restrictions: None,
    }
}

/// One owner, one requester and an active post, wired to a full service.
pub struct Harness {
    pub service: ContactExchangeService,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingPublisher>,
    pub owner: UserId,
    pub requester: UserId,
    pub post_id: PostId,
}

impl Harness {
    /// Harness over a fresh in-memory database.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_store(Arc::new(SqliteStore::open_memory()?), test_protector()?)
    }

    pub fn with_store(store: Arc<SqliteStore>, protector: Arc<dyn SecretProtector>) -> anyhow::Result<Self> {
        let clock = Arc::new(ManualClock::new(TEST_TIMESTAMP));
        let events = Arc::new(RecordingPublisher::new());
        let engine = Arc::new(EncryptionEngine::new(
            store.clone(),
            store.clone(),
            protector,
            clock.clone(),
        ));
        let service = ContactExchangeService::new(
            ServicePorts {
                requests: store.clone(),
                posts: store.clone(),
                users: store.clone(),
                events: events.clone(),
                engine,
                clock: clock.clone(),
            },
            ExchangeSettings::default(),
        );

        let owner = UserId::new();
        let requester = UserId::new();
        let post_id = PostId::new();
        store.upsert_post(&PostSummary {
            id: post_id,
            title: "Lost: brown leather satchel".into(),
            kind: PostKind::Lost,
            status: PostStatus::Active,
            owner_id: owner,
            created_at: TEST_TIMESTAMP - 3_600,
        })?;
        for (user, name) in [(owner, "Jordan"), (requester, "Casey")] {
            store.upsert_user(&PrivacySafeUser {
                user_id: user,
                display_name: name.into(),
                avatar_url: None,
                preferences: Default::default(),
            })?;
        }

        Ok(Self {
            service,
            store,
            clock,
            events,
            owner,
            requester,
            post_id,
        })
    }

    pub fn create_request(&self, expiration_hours: i64) -> anyhow::Result<RequestRecord> {
        Ok(self.service.create_request(CreateRequest {
            post_id: self.post_id,
            requester_id: self.requester,
            message: Some("I found it near the station".into()),
            verification_required: false,
            verification_details: None,
            expiration_hours: Some(expiration_hours),
        })?)
    }

    pub fn approve(&self, record: &RequestRecord, contact: &ContactInfo) -> anyhow::Result<RequestRecord> {
        Ok(self.service.approve(
            &record.id,
            &self.owner,
            ApprovalType::FullContact,
            contact,
            ClientMetadata::default(),
        )?)
    }
}
