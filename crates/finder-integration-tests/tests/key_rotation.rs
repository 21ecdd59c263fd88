//! Integration test: key rotation over a file-backed database.
//!
//! Steps:
//! 1. Payloads sealed before a rotation stay readable after it
//! 2. Two processes rotating at once leave exactly one active key
//! 3. Reopening the database with the same passphrase reads old payloads;
//!    a different passphrase cannot

use std::sync::Arc;

use finder_crypto::argon2id::KdfParams;
use finder_crypto::secret::KekProtector;
use finder_db::SqliteStore;
use finder_exchange::clock::ManualClock;
use finder_exchange::engine::{AuditContext, EncryptionEngine};
use finder_exchange::{ErrorKind, ExchangeError};
use finder_integration_tests::{
    full_contact, temp_db_path, test_protector, Harness, TEST_SALT, TEST_TIMESTAMP,
};
use finder_types::audit::{AuditOperation, AuditQuery, ClientMetadata};

const ROTATIONS_PER_TASK: usize = 5;

#[tokio::test]
async fn test_rotation_keeps_old_payloads_readable() {
    // =========================================================
    // Step 1: Seal under the first key, rotate, seal again
    // =========================================================
    let h = Harness::new().expect("harness");

    let first = h.create_request(72).expect("create");
    let first = h.approve(&first, &full_contact()).expect("approve");
    let old_fp = first
        .encrypted_contact_info
        .as_ref()
        .map(|c| c.key_fingerprint.clone())
        .expect("payload");

    let rotated = h.service.rotate_keys(&h.owner).expect("rotate");
    assert_ne!(rotated.fingerprint, old_fp);
    assert!(rotated.is_active);

    let contact = h
        .service
        .decrypt_contact_info(&first.id, &h.requester, ClientMetadata::default())
        .expect("old payload");
    assert_eq!(contact, full_contact());

    let second = h.create_request(72).expect("create");
    let second = h.approve(&second, &full_contact()).expect("approve");
    assert_eq!(
        second.encrypted_contact_info.map(|c| c.key_fingerprint),
        Some(rotated.fingerprint.clone())
    );

    let keys = h.service.list_keys().expect("keys");
    assert_eq!(keys.len(), 2);
    assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);

    let rotations = h
        .service
        .audit_trail(&AuditQuery::for_user(h.owner))
        .expect("audit")
        .into_iter()
        .filter(|r| r.operation == AuditOperation::KeyRotation)
        .count();
    // Initial provisioning plus the explicit rotation.
    assert_eq!(rotations, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_across_connections() {
    let path = temp_db_path("rotation").expect("temp path");

    // =========================================================
    // Step 2: Two engines, each on its own connection
    // =========================================================

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(SqliteStore::open(&path).expect("open"));
        let engine = Arc::new(EncryptionEngine::new(
            store.clone(),
            store,
            test_protector().expect("protector"),
            Arc::new(ManualClock::new(TEST_TIMESTAMP)),
        ));
        tasks.push(tokio::task::spawn_blocking(move || {
            let mut won = Vec::new();
            let mut lost = 0;
            for _ in 0..ROTATIONS_PER_TASK {
                match engine.rotate_keys(&AuditContext::system()) {
                    Ok(key) => won.push(key.fingerprint),
                    Err(ExchangeError::RotationConflict(_)) => lost += 1,
                    Err(e) => return Err(e),
                }
            }
            Ok((won, lost))
        }));
    }

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        let (won, lost) = task.await.expect("join").expect("rotation");
        winners.extend(won);
        conflicts += lost;
    }
    assert_eq!(winners.len() + conflicts, 2 * ROTATIONS_PER_TASK);
    assert!(!winners.is_empty());

    let store = Arc::new(SqliteStore::open(&path).expect("reopen"));
    let engine = EncryptionEngine::new(
        store.clone(),
        store,
        test_protector().expect("protector"),
        Arc::new(ManualClock::new(TEST_TIMESTAMP)),
    );
    let keys = engine.list_keys().expect("keys");
    let active: Vec<_> = keys.iter().filter(|k| k.is_active).collect();
    assert_eq!(active.len(), 1);
    assert!(winners.contains(&active[0].fingerprint));

    // Every generated key is stored, including the losers'.
    assert_eq!(keys.len(), 2 * ROTATIONS_PER_TASK);

    let _ = std::fs::remove_dir_all(path.parent().expect("dir"));
}

#[tokio::test]
async fn test_restart_needs_the_same_passphrase() {
    let path = temp_db_path("restart").expect("temp path");

    // =========================================================
    // Step 3: Seal under one process, read under the next
    // =========================================================

    let (request_id, requester) = {
        let store = Arc::new(SqliteStore::open(&path).expect("open"));
        let h = Harness::with_store(store, test_protector().expect("protector")).expect("harness");
        let request = h.create_request(72).expect("create");
        h.approve(&request, &full_contact()).expect("approve");
        (request.id, h.requester)
    };

    let store = Arc::new(SqliteStore::open(&path).expect("reopen"));
    let h = Harness::with_store(store, test_protector().expect("protector")).expect("harness");
    let contact = h
        .service
        .decrypt_contact_info(&request_id, &requester, ClientMetadata::default())
        .expect("decrypt after restart");
    assert_eq!(contact, full_contact());

    let store = Arc::new(SqliteStore::open(&path).expect("reopen"));
    let wrong = Arc::new(
        KekProtector::from_passphrase_with(b"not the passphrase", &TEST_SALT, KdfParams::insecure_for_tests())
            .expect("protector"),
    );
    let h = Harness::with_store(store, wrong).expect("harness");
    let err = h
        .service
        .decrypt_contact_info(&request_id, &requester, ClientMetadata::default())
        .expect_err("wrong passphrase");
    assert_eq!(err.kind(), ErrorKind::Crypto);

    let _ = std::fs::remove_dir_all(path.parent().expect("dir"));
}
