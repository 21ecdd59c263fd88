//! Integration test: audit trail of an approval and the reads that follow.
//!
//! Steps:
//! 1. Owner approves; exactly one successful encrypt is recorded
//! 2. The requester decrypts; the read is recorded against them
//! 3. A third party is refused and the refusal is recorded
//! 4. Further transitions out of `approved` are rejected

use finder_exchange::{ErrorKind, ExchangeError};
use finder_integration_tests::{full_contact, Harness};
use finder_types::audit::{AuditOperation, AuditQuery, ClientMetadata};
use finder_types::exchange::{ApprovalType, DenialReason, ExchangeStatus};
use finder_types::ids::UserId;

fn client() -> ClientMetadata {
    ClientMetadata {
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some("finder-web/2.3".into()),
    }
}

#[tokio::test]
async fn test_approval_and_reads_are_audited() {
    let h = Harness::new().expect("harness");
    let request = h.create_request(72).expect("create");

    // =========================================================
    // Step 1: Approval
    // =========================================================

    h.service
        .approve(
            &request.id,
            &h.owner,
            ApprovalType::FullContact,
            &full_contact(),
            client(),
        )
        .expect("approve");

    let active = h
        .service
        .active_key_fingerprint()
        .expect("active key")
        .expect("provisioned on first encrypt");

    let trail = h
        .service
        .audit_trail(&AuditQuery::for_request(request.id))
        .expect("audit");
    let encrypts: Vec<_> = trail
        .iter()
        .filter(|r| r.operation == AuditOperation::Encrypt)
        .collect();
    assert_eq!(encrypts.len(), 1);
    assert!(encrypts[0].success);
    assert_eq!(encrypts[0].key_fingerprint, active);
    assert_eq!(encrypts[0].user_id, h.owner);
    assert_eq!(encrypts[0].request_id, Some(request.id));
    assert_eq!(encrypts[0].client, client());

    // =========================================================
    // Step 2: Requester reads the details
    // =========================================================

    let contact = h
        .service
        .decrypt_contact_info(&request.id, &h.requester, client())
        .expect("decrypt");
    assert_eq!(contact.email.as_deref(), Some("jordan@example.com"));

    let reads = h
        .service
        .audit_trail(&AuditQuery::for_user(h.requester))
        .expect("audit");
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].operation, AuditOperation::Decrypt);
    assert!(reads[0].success);
    assert_eq!(reads[0].key_fingerprint, active);

    // =========================================================
    // Step 3: Third party
    // =========================================================

    let stranger = UserId::new();
    let err = h
        .service
        .decrypt_contact_info(&request.id, &stranger, ClientMetadata::default())
        .expect_err("stranger refused");
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let refused = h
        .service
        .audit_trail(&AuditQuery::for_user(stranger))
        .expect("audit");
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].operation, AuditOperation::Decrypt);
    assert!(!refused[0].success);
    assert!(refused[0].error_message.is_some());
    assert_eq!(refused[0].request_id, Some(request.id));

    let err = h
        .service
        .get_request(&request.id, &stranger)
        .expect_err("stranger cannot view");
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // =========================================================
    // Step 4: Approval is final
    // =========================================================

    let err = h.approve(&request, &full_contact()).expect_err("approve twice");
    assert!(err
        .downcast_ref::<ExchangeError>()
        .is_some_and(|e| matches!(e, ExchangeError::InvalidTransition { .. })));

    let err = h
        .service
        .deny(&request.id, &h.owner, DenialReason::Other, None)
        .expect_err("deny approved");
    assert!(matches!(err, ExchangeError::InvalidTransition { .. }));

    let current = h.service.get_request(&request.id, &h.requester).expect("get");
    assert_eq!(current.status, ExchangeStatus::Approved);

    let encrypts = h
        .service
        .audit_trail(&AuditQuery::for_request(request.id))
        .expect("audit")
        .into_iter()
        .filter(|r| r.operation == AuditOperation::Encrypt)
        .count();
    assert_eq!(encrypts, 1, "rejected approvals encrypt nothing");
}

#[tokio::test]
async fn test_denied_request_holds_no_contact() {
    let h = Harness::new().expect("harness");
    let request = h.create_request(24).expect("create");

    let denied = h
        .service
        .deny(
            &request.id,
            &h.owner,
            DenialReason::InsufficientVerification,
            Some("Describe the lining please".into()),
        )
        .expect("deny");
    assert_eq!(denied.status, ExchangeStatus::Denied);
    assert!(denied.encrypted_contact_info.is_none());

    let err = h
        .service
        .decrypt_contact_info(&request.id, &h.requester, ClientMetadata::default())
        .expect_err("nothing to decrypt");
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(h.approve(&request, &full_contact()).is_err());
    assert_eq!(h.service.active_key_fingerprint().expect("key"), None);
}
