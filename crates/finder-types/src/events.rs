//! Events published when a request changes state.
//!
//! Events are "fat": each carries the request snapshot, the post summary and
//! both parties, so consumers never have to call back. Contact details only
//! ever appear encrypted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contact::EncryptedContactInfo;
use crate::directory::{PostSummary, PrivacySafeUser};
use crate::exchange::{ApprovalType, DenialReason, ExchangeStatus, RequestRecord};

wire_enum! {
    /// Topic an event is published under.
    ExchangeEventType as "event type" {
        Requested => "contact.exchange.requested",
        Approved => "contact.exchange.approved",
        Denied => "contact.exchange.denied",
        Expired => "contact.exchange.expired",
    }
}

/// Transition-specific part of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    Requested,
    Approved {
        approval_type: ApprovalType,
        contact: EncryptedContactInfo,
    },
    Denied {
        reason: DenialReason,
        message: Option<String>,
    },
    Expired {
        /// Status the request held before it expired.
        original_status: ExchangeStatus,
        /// Seconds between creation and expiry processing.
        age_secs: u64,
    },
}

impl EventDetail {
    pub fn event_type(&self) -> ExchangeEventType {
        match self {
            EventDetail::Requested => ExchangeEventType::Requested,
            EventDetail::Approved { .. } => ExchangeEventType::Approved,
            EventDetail::Denied { .. } => ExchangeEventType::Denied,
            EventDetail::Expired { .. } => ExchangeEventType::Expired,
        }
    }
}

/// Envelope for every contact exchange event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEvent {
    pub event_id: Uuid,
    pub event_type: ExchangeEventType,
    pub occurred_at: u64,
    pub request: RequestRecord,
    pub post: PostSummary,
    pub requester: PrivacySafeUser,
    pub owner: PrivacySafeUser,
    pub detail: EventDetail,
}

impl ExchangeEvent {
    pub fn new(
        occurred_at: u64,
        request: RequestRecord,
        post: PostSummary,
        requester: PrivacySafeUser,
        owner: PrivacySafeUser,
        detail: EventDetail,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: detail.event_type(),
            occurred_at,
            request,
            post,
            requester,
            owner,
            detail,
        }
    }
}
