//! Contact payloads: plaintext as supplied by the owner, and the encrypted
//! forms that are stored and shared.

use serde::{Deserialize, Serialize};

wire_enum! {
    /// Channel the owner prefers to be reached on.
    ContactMethod as "contact method" {
        Email => "email",
        Phone => "phone",
        Platform => "platform",
    }
}

/// Limits the owner places on shared contact details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingRestrictions {
    pub expires_after_hours: u32,
    pub single_use: bool,
    pub platform_mediated: bool,
}

/// Plaintext contact details. Never persisted or logged in this form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub preferred_method: ContactMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<SharingRestrictions>,
}

impl ContactInfo {
    /// Check the payload names a reachable channel.
    pub fn validate(&self) -> Result<(), String> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.preferred_method {
            ContactMethod::Email if !present(&self.email) => {
                Err("preferred method is email but no email given".into())
            }
            ContactMethod::Phone if !present(&self.phone) => {
                Err("preferred method is phone but no phone given".into())
            }
            _ => Ok(()),
        }
    }
}

// Redacted so contact details never reach logs through `{:?}`.
impl std::fmt::Debug for ContactInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactInfo")
            .field("email", &self.email.as_ref().map(|_| "<redacted>"))
            .field("phone", &self.phone.as_ref().map(|_| "<redacted>"))
            .field("preferred_method", &self.preferred_method)
            .field("restrictions", &self.restrictions)
            .finish_non_exhaustive()
    }
}

/// Encrypted contact payload attached to an approved request.
///
/// `ciphertext` is a base64 envelope holding the whole [`ContactInfo`];
/// only the routing hints beside it are readable without the key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContactInfo {
    pub ciphertext: String,
    pub key_fingerprint: String,
    pub preferred_method: ContactMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<SharingRestrictions>,
}

/// Self-contained, expiring encrypted bundle usable outside a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactToken {
    /// Base64 envelope.
    pub token: String,
    pub key_fingerprint: String,
    pub expires_at: u64,
    pub created_at: u64,
    /// Hex SHA-256 over the decoded envelope bytes.
    pub integrity_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(method: ContactMethod) -> ContactInfo {
        ContactInfo {
            email: Some("owner@example.com".into()),
            phone: None,
            preferred_method: method,
            message: None,
            restrictions: None,
        }
    }

    #[test]
    fn test_validate_requires_preferred_channel() {
        assert!(info(ContactMethod::Email).validate().is_ok());
        assert!(info(ContactMethod::Phone).validate().is_err());
        assert!(info(ContactMethod::Platform).validate().is_ok());

        let mut blank = info(ContactMethod::Email);
        blank.email = Some("  ".into());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_details() {
        let rendered = format!("{:?}", info(ContactMethod::Email));
        assert!(!rendered.contains("owner@example.com"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let json = serde_json::to_string(&info(ContactMethod::Email)).expect("serialize");
        assert!(!json.contains("phone"));
        let parsed: ContactInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, info(ContactMethod::Email));
    }
}
