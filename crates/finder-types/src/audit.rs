//! Audit trail of cryptographic operations.

use serde::{Deserialize, Serialize};

use crate::ids::{AuditId, RequestId, UserId};
use crate::DEFAULT_AUDIT_LIMIT;

wire_enum! {
    /// Kind of operation an audit record describes.
    AuditOperation as "audit operation" {
        Encrypt => "encrypt",
        Decrypt => "decrypt",
        TokenCreate => "token_create",
        TokenValidate => "token_validate",
        KeyRotation => "key_rotation",
        /// Removal of an expired request's encrypted payload.
        ContactPurge => "contact_purge",
    }
}

/// Fingerprint recorded when no key could be resolved.
pub const UNKNOWN_FINGERPRINT: &str = "unknown";

/// Network context of the caller, when known.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// One immutable audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub operation: AuditOperation,
    pub user_id: UserId,
    pub request_id: Option<RequestId>,
    pub key_fingerprint: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: u64,
    #[serde(default)]
    pub client: ClientMetadata,
}

/// Filter for reading the audit trail. Results are newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub request_id: Option<RequestId>,
    /// Values of zero or below fall back to the default page size.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub fn for_request(request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_AUDIT_LIMIT,
        }
    }

    /// Whether `record` passes this filter, ignoring the limit.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.user_id.map_or(true, |u| record.user_id == u)
            && self.request_id.map_or(true, |r| record.request_id == Some(r))
    }
}
