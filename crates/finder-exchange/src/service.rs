//! Contact exchange orchestration.
//!
//! [`ContactExchangeService`] is the only entry point callers need. For every
//! operation it:
//!
//! 1. loads the request and checks who is asking,
//! 2. runs the transition on the aggregate (encrypting first for approvals),
//! 3. persists the new state in one conditional write,
//! 4. publishes an event, best-effort, once the write has succeeded.
//!
//! Event publication never fails an operation; problems are logged at debug
//! level and dropped.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use finder_types::audit::{AuditOperation, AuditQuery, AuditRecord, ClientMetadata, UNKNOWN_FINGERPRINT};
use finder_types::contact::{ContactInfo, ContactToken};
use finder_types::directory::{PostStatus, PrivacySafeUser};
use finder_types::events::{EventDetail, ExchangeEvent};
use finder_types::exchange::{
    ApprovalType, DenialReason, ExchangeStatus, RequestRecord, RequestRole, VerificationDetails,
};
use finder_types::ids::{PostId, RequestId, UserId};
use finder_types::keys::KeyInfo;
use finder_types::DEFAULT_EXPIRATION_HOURS;

use crate::clock::Clock;
use crate::engine::{AuditContext, EncryptionEngine};
use crate::ports::{EventPublisher, PostDirectory, RequestRepository, StoreError, UserDirectory};
use crate::request::{ContactExchangeRequest, NewRequest};
use crate::{ExchangeError, Result};

/// Message stored when a requester withdraws their request.
pub const CANCELLED_MESSAGE: &str = "Cancelled by requester";

/// Largest page [`ContactExchangeService::list_requests`] returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Tunables.
#[derive(Clone, Debug)]
pub struct ExchangeSettings {
    /// Used when a request asks for no particular lifetime.
    pub default_expiration_hours: u64,
    /// Records fetched per sweep query.
    pub sweep_batch_size: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            default_expiration_hours: DEFAULT_EXPIRATION_HOURS,
            sweep_batch_size: 100,
        }
    }
}

/// Everything the service talks to.
#[derive(Clone)]
pub struct ServicePorts {
    pub requests: Arc<dyn RequestRepository>,
    pub posts: Arc<dyn PostDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub events: Arc<dyn EventPublisher>,
    pub engine: Arc<EncryptionEngine>,
    pub clock: Arc<dyn Clock>,
}

/// Input for [`ContactExchangeService::create_request`].
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub post_id: PostId,
    pub requester_id: UserId,
    pub message: Option<String>,
    pub verification_required: bool,
    pub verification_details: Option<VerificationDetails>,
    /// `None`, zero or negative selects the configured default.
    pub expiration_hours: Option<i64>,
}

/// Outcome of one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct ContactExchangeService {
    requests: Arc<dyn RequestRepository>,
    posts: Arc<dyn PostDirectory>,
    users: Arc<dyn UserDirectory>,
    events: Arc<dyn EventPublisher>,
    engine: Arc<EncryptionEngine>,
    clock: Arc<dyn Clock>,
    settings: ExchangeSettings,
}

impl ContactExchangeService {
    pub fn new(ports: ServicePorts, settings: ExchangeSettings) -> Self {
        Self {
            requests: ports.requests,
            posts: ports.posts,
            users: ports.users,
            events: ports.events,
            engine: ports.engine,
            clock: ports.clock,
            settings,
        }
    }

    pub fn engine(&self) -> &EncryptionEngine {
        &self.engine
    }

    // --- Request lifecycle -----------------------------------------------

    /// Open a request for the contact details of a post's owner.
    pub fn create_request(&self, input: CreateRequest) -> Result<RequestRecord> {
        let post = self.posts.post(&input.post_id).map_err(|e| match e {
            StoreError::NotFound(_) => ExchangeError::NotFound(format!("post {}", input.post_id)),
            other => other.into(),
        })?;
        if post.status != PostStatus::Active {
            return Err(ExchangeError::PostNotActive(post.status.to_string()));
        }

        let expiration_hours = input
            .expiration_hours
            .filter(|h| *h > 0)
            .unwrap_or_else(|| i64::try_from(self.settings.default_expiration_hours).unwrap_or(0));

        let now = self.clock.now();
        let request = ContactExchangeRequest::new(
            NewRequest {
                post_id: input.post_id,
                requester_id: input.requester_id,
                owner_id: post.owner_id,
                message: input.message,
                verification_required: input.verification_required,
                verification_details: input.verification_details,
                expiration_hours,
            },
            now,
        )?;

        let record = request.to_record();
        self.requests.insert(&record)?;
        info!(request = %record.id, post = %record.post_id, "contact exchange requested");

        self.emit(&record, EventDetail::Requested);
        Ok(record)
    }

    /// Owner approves, sharing `contact`. The details are encrypted before
    /// anything is stored; if encryption fails the request stays pending.
    /// The encrypt audit entry is committed in the same write as the
    /// approval, so neither exists without the other.
    pub fn approve(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        approval_type: ApprovalType,
        contact: &ContactInfo,
        client: ClientMetadata,
    ) -> Result<RequestRecord> {
        let mut request = self.load(request_id)?;
        if request.owner_id() != *actor {
            return Err(ExchangeError::Unauthorized {
                user: *actor,
                action: "approve",
            });
        }

        // Refuse before encrypting anything for a request that cannot move.
        let now = self.clock.now();
        request.ensure_approvable(now)?;
        contact.validate().map_err(ExchangeError::InvalidInput)?;

        let ctx = AuditContext::new(*actor)
            .with_request(*request_id)
            .with_client(client);
        let (encrypted, audit) = self.engine.seal_contact_info(&ctx, contact)?;

        // The success record is stored only together with the approval.
        let committed = request
            .approve(approval_type, encrypted.clone(), now)
            .and_then(|()| {
                let record = request.to_record();
                self.requests
                    .update_with_audit(&record, ExchangeStatus::Pending, &audit)?;
                Ok(record)
            });
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                return Err(self.reject(
                    AuditOperation::Encrypt,
                    &ctx,
                    &audit.key_fingerprint,
                    e,
                ))
            }
        };
        info!(request = %record.id, %approval_type, "contact exchange approved");

        self.emit(
            &record,
            EventDetail::Approved {
                approval_type,
                contact: encrypted,
            },
        );
        Ok(record)
    }

    /// Owner declines.
    pub fn deny(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        reason: DenialReason,
        message: Option<String>,
    ) -> Result<RequestRecord> {
        let request = self.load(request_id)?;
        if request.owner_id() != *actor {
            return Err(ExchangeError::Unauthorized {
                user: *actor,
                action: "deny",
            });
        }
        self.finish_denial(request, reason, message)
    }

    /// Requester withdraws a pending request.
    pub fn cancel_request(&self, request_id: &RequestId, actor: &UserId) -> Result<RequestRecord> {
        let request = self.load(request_id)?;
        if request.requester_id() != *actor {
            return Err(ExchangeError::Unauthorized {
                user: *actor,
                action: "cancel",
            });
        }
        self.finish_denial(
            request,
            DenialReason::UserPreference,
            Some(CANCELLED_MESSAGE.to_string()),
        )
    }

    fn finish_denial(
        &self,
        mut request: ContactExchangeRequest,
        reason: DenialReason,
        message: Option<String>,
    ) -> Result<RequestRecord> {
        request.deny(reason, message.clone(), self.clock.now())?;
        let record = request.to_record();
        self.requests.update(&record, ExchangeStatus::Pending)?;
        info!(request = %record.id, %reason, "contact exchange denied");

        self.emit(&record, EventDetail::Denied { reason, message });
        Ok(record)
    }

    /// A request, visible only to its two parties.
    pub fn get_request(&self, request_id: &RequestId, caller: &UserId) -> Result<RequestRecord> {
        let record = self.requests.get(request_id)?;
        if !record.is_party(caller) {
            return Err(ExchangeError::Unauthorized {
                user: *caller,
                action: "view",
            });
        }
        Ok(record)
    }

    /// Requests `user` takes part in, newest first.
    pub fn list_requests(
        &self,
        user: &UserId,
        role: RequestRole,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<RequestRecord>> {
        let limit = limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);
        Ok(self.requests.list_for_user(user, role, limit, offset)?)
    }

    // --- Contact details -------------------------------------------------

    /// Decrypt the shared details for one of the two parties.
    ///
    /// Every attempt is audited, including ones refused before decryption.
    pub fn decrypt_contact_info(
        &self,
        request_id: &RequestId,
        caller: &UserId,
        client: ClientMetadata,
    ) -> Result<ContactInfo> {
        let ctx = AuditContext::new(*caller)
            .with_request(*request_id)
            .with_client(client);

        let request = match self.load(request_id) {
            Ok(request) => request,
            Err(e) => return Err(self.reject_decrypt(&ctx, UNKNOWN_FINGERPRINT, e)),
        };
        let fingerprint = request
            .contact_info()
            .map(|c| c.key_fingerprint.clone())
            .unwrap_or_else(|| UNKNOWN_FINGERPRINT.to_string());

        if !request.is_party(caller) {
            let err = ExchangeError::Unauthorized {
                user: *caller,
                action: "decrypt contact info of",
            };
            warn!(request = %request_id, user = %caller, "contact decrypt by non-party refused");
            return Err(self.reject_decrypt(&ctx, &fingerprint, err));
        }
        if request.status() != ExchangeStatus::Approved {
            let err = ExchangeError::InvalidTransition {
                from: request.status(),
                action: "decrypt contact info of",
            };
            return Err(self.reject_decrypt(&ctx, &fingerprint, err));
        }
        if request.is_expired(self.clock.now()) {
            let err = ExchangeError::AlreadyExpired {
                expires_at: request.expires_at(),
            };
            return Err(self.reject_decrypt(&ctx, &fingerprint, err));
        }

        self.engine.decrypt_contact_info(&ctx, request.contact_info())
    }

    fn reject_decrypt(&self, ctx: &AuditContext, fingerprint: &str, err: ExchangeError) -> ExchangeError {
        self.reject(AuditOperation::Decrypt, ctx, fingerprint, err)
    }

    /// Record `err` as a failed `operation` and hand it back.
    fn reject(
        &self,
        operation: AuditOperation,
        ctx: &AuditContext,
        fingerprint: &str,
        err: ExchangeError,
    ) -> ExchangeError {
        match self
            .engine
            .record_rejection(operation, ctx, fingerprint, &err)
        {
            Ok(()) => err,
            Err(audit_err) => audit_err,
        }
    }

    /// Issue a standalone token for `contact`.
    pub fn generate_contact_token(
        &self,
        caller: &UserId,
        contact: &ContactInfo,
        expires_at: u64,
        client: ClientMetadata,
    ) -> Result<ContactToken> {
        contact.validate().map_err(ExchangeError::InvalidInput)?;
        let ctx = AuditContext::new(*caller).with_client(client);
        self.engine.generate_contact_token(&ctx, contact, expires_at)
    }

    pub fn validate_contact_token(
        &self,
        caller: &UserId,
        token: &ContactToken,
        client: ClientMetadata,
    ) -> Result<ContactInfo> {
        let ctx = AuditContext::new(*caller).with_client(client);
        self.engine.validate_contact_token(&ctx, token)
    }

    // --- Keys and audit --------------------------------------------------

    pub fn rotate_keys(&self, actor: &UserId) -> Result<KeyInfo> {
        self.engine.rotate_keys(&AuditContext::new(*actor))
    }

    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        self.engine.list_keys()
    }

    pub fn active_key_fingerprint(&self) -> Result<Option<String>> {
        self.engine.active_key_fingerprint()
    }

    pub fn audit_trail(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.engine.audit_trail(query)
    }

    // --- Sweeps ----------------------------------------------------------

    /// Expire every pending or approved request past its expiry.
    ///
    /// A record that fails is logged, skipped for the rest of this run, and
    /// counted in [`SweepReport::failed`].
    pub fn process_expired_requests(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        self.sweep(
            |limit| self.requests.due_for_expiry(now, limit),
            |record| self.expire_one(record, now),
        )
    }

    fn expire_one(&self, record: RequestRecord, now: u64) -> Result<()> {
        let mut request = ContactExchangeRequest::from_record(record)?;
        let original_status = request.status();
        request.expire(now)?;

        let record = request.to_record();
        self.requests.update(&record, original_status)?;
        info!(request = %record.id, from = %original_status, "contact exchange expired");

        self.emit(
            &record,
            EventDetail::Expired {
                original_status,
                age_secs: now.saturating_sub(record.created_at),
            },
        );
        Ok(())
    }

    /// Purge the encrypted details held by expired requests.
    pub fn cleanup_expired_tokens(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        self.sweep(
            |limit| self.requests.expired_with_contact(limit),
            |record| self.purge_one(record, now),
        )
    }

    fn purge_one(&self, record: RequestRecord, now: u64) -> Result<()> {
        let mut request = ContactExchangeRequest::from_record(record)?;
        let Some(removed) = request.clear_contact_info(now)? else {
            return Ok(());
        };

        let audit = self.engine.purge_record(
            &AuditContext::system().with_request(request.id()),
            &removed.key_fingerprint,
        );
        self.requests
            .update_with_audit(&request.to_record(), ExchangeStatus::Expired, &audit)?;
        info!(request = %request.id(), "expired contact details purged");
        Ok(())
    }

    fn sweep(
        &self,
        fetch: impl Fn(u32) -> std::result::Result<Vec<RequestRecord>, StoreError>,
        mut process: impl FnMut(RequestRecord) -> Result<()>,
    ) -> Result<SweepReport> {
        let batch = self.settings.sweep_batch_size.max(1);
        let mut report = SweepReport::default();
        let mut failed: HashSet<RequestId> = HashSet::new();

        loop {
            // Over-fetch by the failures so far; they are still due and would
            // otherwise crowd out fresh records.
            let limit = batch.saturating_add(u32::try_from(failed.len()).unwrap_or(u32::MAX));
            let fresh: Vec<RequestRecord> = fetch(limit)?
                .into_iter()
                .filter(|r| !failed.contains(&r.id))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for record in fresh {
                let id = record.id;
                match process(record) {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        warn!(request = %id, error = %e, "sweep skipped request");
                        failed.insert(id);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    // --- Internals -------------------------------------------------------

    fn load(&self, request_id: &RequestId) -> Result<ContactExchangeRequest> {
        ContactExchangeRequest::from_record(self.requests.get(request_id)?)
    }

    fn party(&self, user: &UserId) -> PrivacySafeUser {
        self.users.privacy_safe_user(user).unwrap_or_else(|e| {
            debug!(%user, error = %e, "user context unavailable, using placeholder");
            PrivacySafeUser::anonymous(*user)
        })
    }

    /// Publish after commit. Never fails the caller.
    fn emit(&self, record: &RequestRecord, detail: EventDetail) {
        let post = match self.posts.post(&record.post_id) {
            Ok(post) => post,
            Err(e) => {
                debug!(request = %record.id, error = %e, "event dropped: post unavailable");
                return;
            }
        };
        let event = ExchangeEvent::new(
            self.clock.now(),
            record.clone(),
            post,
            self.party(&record.requester_id),
            self.party(&record.owner_id),
            detail,
        );
        let event_type = event.event_type;
        if let Err(e) = self.events.publish(event) {
            debug!(request = %record.id, %event_type, error = %e, "event publish failed");
        }
    }
}
