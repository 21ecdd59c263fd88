//! Stored encryption key pairs.

use serde::{Deserialize, Serialize};

use crate::ids::KeyId;

/// A server key pair as held by a key store.
///
/// The private half is only ever present in sealed form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub id: KeyId,
    /// Hex SHA-256 of `public_key`.
    pub fingerprint: String,
    pub public_key: Vec<u8>,
    pub sealed_private_key: Vec<u8>,
    pub is_active: bool,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

impl EncryptionKey {
    /// Public view of this key.
    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            id: self.id,
            fingerprint: self.fingerprint.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Key metadata safe to return to operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: KeyId,
    pub fingerprint: String,
    pub is_active: bool,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}
