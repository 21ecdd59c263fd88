//! The contact exchange request aggregate.
//!
//! ## States
//!
//! ```text
//! pending ──approve──▶ approved ──expire──▶ expired ──clear──▶ expired (no payload)
//!    │                                         ▲
//!    ├──────────────expire─────────────────────┘
//!    └──deny──▶ denied
//! ```
//!
//! The status lives in [`RequestState`], and the only way to change it is
//! through the transition methods below. Each transition either succeeds
//! completely or returns an error and leaves the request untouched.

use finder_types::contact::EncryptedContactInfo;
use finder_types::exchange::{
    ApprovalType, DenialReason, ExchangeStatus, RequestRecord, VerificationDetails,
};
use finder_types::ids::{PostId, RequestId, UserId};
use finder_types::{DEFAULT_EXPIRATION_HOURS, HOUR_SECS, MAX_EXPIRATION_HOURS};

use crate::{ExchangeError, Result};

/// Status plus the data that only exists in that status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Approved {
        approval_type: ApprovalType,
        contact: EncryptedContactInfo,
    },
    Denied {
        reason: DenialReason,
        message: Option<String>,
    },
    Expired {
        /// Set when the request had been approved before expiring.
        approval_type: Option<ApprovalType>,
        /// Encrypted payload awaiting the cleanup sweep.
        residual_contact: Option<EncryptedContactInfo>,
    },
}

impl RequestState {
    pub fn status(&self) -> ExchangeStatus {
        match self {
            RequestState::Pending => ExchangeStatus::Pending,
            RequestState::Approved { .. } => ExchangeStatus::Approved,
            RequestState::Denied { .. } => ExchangeStatus::Denied,
            RequestState::Expired { .. } => ExchangeStatus::Expired,
        }
    }
}

/// Parameters for opening a new request.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub post_id: PostId,
    pub requester_id: UserId,
    pub owner_id: UserId,
    pub message: Option<String>,
    pub verification_required: bool,
    pub verification_details: Option<VerificationDetails>,
    /// Lifetime in hours; zero or below selects the 72 hour default.
    pub expiration_hours: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactExchangeRequest {
    id: RequestId,
    post_id: PostId,
    requester_id: UserId,
    owner_id: UserId,
    state: RequestState,
    message: Option<String>,
    verification_required: bool,
    verification_details: Option<VerificationDetails>,
    expires_at: u64,
    created_at: u64,
    updated_at: u64,
}

impl ContactExchangeRequest {
    /// Open a new pending request at time `now`.
    pub fn new(params: NewRequest, now: u64) -> Result<Self> {
        if params.post_id.is_nil() {
            return Err(ExchangeError::InvalidPostId);
        }
        if params.requester_id.is_nil() || params.owner_id.is_nil() {
            return Err(ExchangeError::InvalidUserId);
        }
        if params.requester_id == params.owner_id {
            return Err(ExchangeError::SelfRequest);
        }

        let hours = u64::try_from(params.expiration_hours)
            .ok()
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_EXPIRATION_HOURS);
        if hours > MAX_EXPIRATION_HOURS {
            return Err(ExchangeError::InvalidInput(format!(
                "expiration of {hours}h exceeds the {MAX_EXPIRATION_HOURS}h maximum"
            )));
        }
        let expires_at = hours
            .checked_mul(HOUR_SECS)
            .and_then(|secs| now.checked_add(secs))
            .ok_or_else(|| ExchangeError::InvalidInput("expiration too far in the future".into()))?;

        Ok(Self {
            id: RequestId::new(),
            post_id: params.post_id,
            requester_id: params.requester_id,
            owner_id: params.owner_id,
            state: RequestState::Pending,
            message: params.message,
            verification_required: params.verification_required,
            verification_details: params.verification_details,
            expires_at,
            created_at: now,
            updated_at: now,
        })
    }

    // --- Transitions -----------------------------------------------------

    /// Approve with an already encrypted payload.
    pub fn approve(
        &mut self,
        approval_type: ApprovalType,
        contact: EncryptedContactInfo,
        now: u64,
    ) -> Result<()> {
        self.ensure_approvable(now)?;
        self.state = RequestState::Approved {
            approval_type,
            contact,
        };
        self.updated_at = now;
        Ok(())
    }

    pub fn deny(&mut self, reason: DenialReason, message: Option<String>, now: u64) -> Result<()> {
        self.ensure_pending("deny")?;
        self.state = RequestState::Denied { reason, message };
        self.updated_at = now;
        Ok(())
    }

    /// Mark expired. Repeating it on an expired request is a no-op.
    pub fn expire(&mut self, now: u64) -> Result<()> {
        let next = match &self.state {
            RequestState::Expired { .. } => return Ok(()),
            RequestState::Pending => RequestState::Expired {
                approval_type: None,
                residual_contact: None,
            },
            RequestState::Approved {
                approval_type,
                contact,
            } => RequestState::Expired {
                approval_type: Some(*approval_type),
                residual_contact: Some(contact.clone()),
            },
            RequestState::Denied { .. } => {
                return Err(ExchangeError::InvalidTransition {
                    from: ExchangeStatus::Denied,
                    action: "expire",
                })
            }
        };
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Drop the encrypted payload of an expired request, returning it.
    ///
    /// Returns `Ok(None)` when it was already cleared.
    pub fn clear_contact_info(&mut self, now: u64) -> Result<Option<EncryptedContactInfo>> {
        match &mut self.state {
            RequestState::Expired {
                residual_contact, ..
            } => {
                let removed = residual_contact.take();
                if removed.is_some() {
                    self.updated_at = now;
                }
                Ok(removed)
            }
            other => Err(ExchangeError::InvalidTransition {
                from: other.status(),
                action: "clear contact info of",
            }),
        }
    }

    /// The error [`approve`](Self::approve) would return, if any.
    pub fn ensure_approvable(&self, now: u64) -> Result<()> {
        self.ensure_pending("approve")?;
        if self.is_expired(now) {
            return Err(ExchangeError::AlreadyExpired {
                expires_at: self.expires_at,
            });
        }
        Ok(())
    }

    fn ensure_pending(&self, action: &'static str) -> Result<()> {
        match self.state {
            RequestState::Pending => Ok(()),
            ref other => Err(ExchangeError::InvalidTransition {
                from: other.status(),
                action,
            }),
        }
    }

    // --- Predicates ------------------------------------------------------

    pub fn can_be_approved(&self, now: u64) -> bool {
        self.state == RequestState::Pending && !self.is_expired(now)
    }

    pub fn can_be_denied(&self) -> bool {
        self.state == RequestState::Pending
    }

    /// Strictly past the stored expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn is_party(&self, user: &UserId) -> bool {
        self.requester_id == *user || self.owner_id == *user
    }

    // --- Accessors -------------------------------------------------------

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn status(&self) -> ExchangeStatus {
        self.state.status()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn verification_required(&self) -> bool {
        self.verification_required
    }

    pub fn verification_details(&self) -> Option<&VerificationDetails> {
        self.verification_details.as_ref()
    }

    /// The encrypted payload, while one is held.
    pub fn contact_info(&self) -> Option<&EncryptedContactInfo> {
        match &self.state {
            RequestState::Approved { contact, .. } => Some(contact),
            RequestState::Expired {
                residual_contact, ..
            } => residual_contact.as_ref(),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    // --- Persistence -----------------------------------------------------

    pub fn to_record(&self) -> RequestRecord {
        let (approval_type, denial_reason, denial_message) = match &self.state {
            RequestState::Pending => (None, None, None),
            RequestState::Approved { approval_type, .. } => (Some(*approval_type), None, None),
            RequestState::Denied { reason, message } => (None, Some(*reason), message.clone()),
            RequestState::Expired { approval_type, .. } => (*approval_type, None, None),
        };

        RequestRecord {
            id: self.id,
            post_id: self.post_id,
            requester_id: self.requester_id,
            owner_id: self.owner_id,
            status: self.status(),
            message: self.message.clone(),
            verification_required: self.verification_required,
            verification_details: self.verification_details.clone(),
            approval_type,
            denial_reason,
            denial_message,
            encrypted_contact_info: self.contact_info().cloned(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Rebuild from storage, rejecting records no sequence of transitions
    /// could have produced.
    pub fn from_record(record: RequestRecord) -> Result<Self> {
        let invalid = |msg: &str| ExchangeError::InvalidRecord(format!("{}: {msg}", record.id));

        if record.post_id.is_nil() || record.requester_id.is_nil() || record.owner_id.is_nil() {
            return Err(invalid("nil identifier"));
        }
        if record.requester_id == record.owner_id {
            return Err(invalid("requester is the owner"));
        }
        if record.expires_at <= record.created_at {
            return Err(invalid("expiry not after creation"));
        }

        let state = match record.status {
            ExchangeStatus::Pending => {
                if record.approval_type.is_some()
                    || record.denial_reason.is_some()
                    || record.encrypted_contact_info.is_some()
                {
                    return Err(invalid("pending request carries outcome data"));
                }
                RequestState::Pending
            }
            ExchangeStatus::Approved => match (record.approval_type, &record.encrypted_contact_info) {
                (Some(approval_type), Some(contact)) => RequestState::Approved {
                    approval_type,
                    contact: contact.clone(),
                },
                _ => return Err(invalid("approved request without approval type or payload")),
            },
            ExchangeStatus::Denied => {
                if record.encrypted_contact_info.is_some() {
                    return Err(invalid("denied request carries a payload"));
                }
                let reason = record
                    .denial_reason
                    .ok_or_else(|| invalid("denied request without reason"))?;
                RequestState::Denied {
                    reason,
                    message: record.denial_message.clone(),
                }
            }
            ExchangeStatus::Expired => RequestState::Expired {
                approval_type: record.approval_type,
                residual_contact: record.encrypted_contact_info.clone(),
            },
        };

        Ok(Self {
            id: record.id,
            post_id: record.post_id,
            requester_id: record.requester_id,
            owner_id: record.owner_id,
            state,
            message: record.message,
            verification_required: record.verification_required,
            verification_details: record.verification_details,
            expires_at: record.expires_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
