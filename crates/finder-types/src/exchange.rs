//! Contact exchange request vocabulary and the flat request record.

use serde::{Deserialize, Serialize};

use crate::contact::EncryptedContactInfo;
use crate::ids::{PostId, RequestId, UserId};

wire_enum! {
    /// Lifecycle status of a contact exchange request.
    ExchangeStatus as "exchange status" {
        Pending => "pending",
        Approved => "approved",
        Denied => "denied",
        Expired => "expired",
    }
}

impl ExchangeStatus {
    /// Denied and expired requests accept no further transitions, except the
    /// payload purge on expired ones.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Denied | ExchangeStatus::Expired)
    }
}

wire_enum! {
    /// How much contact detail the owner agreed to share.
    ApprovalType as "approval type" {
        FullContact => "full_contact",
        PlatformMessage => "platform_message",
        LimitedContact => "limited_contact",
    }
}

wire_enum! {
    /// Proof the owner asks of the requester before approving.
    VerificationMethod as "verification method" {
        PhotoProof => "photo_proof",
        SecurityQuestion => "security_question",
        AdminApproval => "admin_approval",
    }
}

wire_enum! {
    /// Why a request was denied.
    DenialReason as "denial reason" {
        NotOwner => "not_owner",
        InsufficientVerification => "insufficient_verification",
        SuspiciousRequest => "suspicious_request",
        PostResolved => "post_resolved",
        /// Also used when the requester withdraws their own request.
        UserPreference => "user_preference",
        Other => "other",
    }
}

wire_enum! {
    /// Which side of a request a listing is filtered on.
    RequestRole as "request role" {
        Requester => "requester",
        Owner => "owner",
        Any => "any",
    }
}

/// Verification the requester must satisfy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationDetails {
    pub method: VerificationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Flat snapshot of a request, as stored and as carried in events.
///
/// Holds no invariants of its own; the aggregate validates it on restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub post_id: PostId,
    pub requester_id: UserId,
    pub owner_id: UserId,
    pub status: ExchangeStatus,
    pub message: Option<String>,
    pub verification_required: bool,
    pub verification_details: Option<VerificationDetails>,
    pub approval_type: Option<ApprovalType>,
    pub denial_reason: Option<DenialReason>,
    pub denial_message: Option<String>,
    pub encrypted_contact_info: Option<EncryptedContactInfo>,
    pub expires_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RequestRecord {
    /// Whether `user` is the requester or the owner.
    pub fn is_party(&self, user: &UserId) -> bool {
        self.requester_id == *user || self.owner_id == *user
    }
}
