//! Encryption engine for contact details.
//!
//! ## Scheme
//!
//! Contact payloads are serialized to JSON and sealed in a hybrid
//! [`envelope`]: a fresh data key encrypts the payload, and only the data key
//! is wrapped to the active X25519 key. The envelope names the key by its
//! fingerprint, so data stays decryptable after rotation.
//!
//! ## Keys
//!
//! The active key is read from the [`KeyStore`] on every operation; nothing
//! is cached, so a rotation by any process is seen by the next call. The
//! first operation that needs a key provisions one. Private keys reach the
//! store only sealed by the [`SecretProtector`].
//!
//! ## Audit
//!
//! Each public operation appends exactly one [`AuditRecord`] before it
//! returns, success or failure. If that append fails, a successful result is
//! discarded and [`ExchangeError::Audit`] is returned instead.
//!
//! [`EncryptionEngine::seal_contact_info`] is the exception: its success
//! record is returned to the caller, which stores it atomically with the
//! request it belongs to.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use finder_crypto::envelope::{self, Envelope};
use finder_crypto::secret::SecretProtector;
use finder_crypto::sha256;
use finder_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use finder_types::audit::{
    AuditOperation, AuditQuery, AuditRecord, ClientMetadata, UNKNOWN_FINGERPRINT,
};
use finder_types::contact::{ContactInfo, ContactToken, EncryptedContactInfo};
use finder_types::ids::{AuditId, KeyId, RequestId, UserId};
use finder_types::keys::{EncryptionKey, KeyInfo};

use crate::clock::Clock;
use crate::ports::{AuditLog, KeyStore, StoreError};
use crate::{ExchangeError, Result};

/// Random bytes mixed into every token payload.
const TOKEN_NONCE_LEN: usize = 16;

/// Actor recorded for work nobody asked for directly, such as sweeps.
pub fn system_actor() -> UserId {
    UserId::from_uuid(Uuid::nil())
}

/// Who is asking, and on behalf of which request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub actor: UserId,
    pub request_id: Option<RequestId>,
    pub client: ClientMetadata,
}

impl AuditContext {
    pub fn new(actor: UserId) -> Self {
        Self {
            actor,
            request_id: None,
            client: ClientMetadata::default(),
        }
    }

    pub fn system() -> Self {
        Self::new(system_actor())
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_client(mut self, client: ClientMetadata) -> Self {
        self.client = client;
        self
    }
}

/// Sealed inside a [`ContactToken`].
#[derive(Serialize, Deserialize)]
struct TokenPayload {
    nonce: String,
    contact: ContactInfo,
    created_at: u64,
    expires_at: u64,
}

pub struct EncryptionEngine {
    keys: Arc<dyn KeyStore>,
    audit: Arc<dyn AuditLog>,
    protector: Arc<dyn SecretProtector>,
    clock: Arc<dyn Clock>,
}

impl EncryptionEngine {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        audit: Arc<dyn AuditLog>,
        protector: Arc<dyn SecretProtector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            audit,
            protector,
            clock,
        }
    }

    // --- Contact payloads ------------------------------------------------

    /// Encrypt `info` under the active key.
    pub fn encrypt_contact_info(
        &self,
        ctx: &AuditContext,
        info: &ContactInfo,
    ) -> Result<EncryptedContactInfo> {
        let (encrypted, record) = self.seal_contact_info(ctx, info)?;
        self.store(&record)?;
        Ok(encrypted)
    }

    /// Encrypt `info` like [`EncryptionEngine::encrypt_contact_info`], but
    /// hand the success record back unstored so the caller can commit it in
    /// the same write as the state it describes.
    ///
    /// A failed encryption is recorded here, before returning.
    pub fn seal_contact_info(
        &self,
        ctx: &AuditContext,
        info: &ContactInfo,
    ) -> Result<(EncryptedContactInfo, AuditRecord)> {
        let mut fingerprint = UNKNOWN_FINGERPRINT.to_string();
        match self.encrypt_payload(ctx, info, &mut fingerprint) {
            Ok(encrypted) => {
                let record = self.audit_record(AuditOperation::Encrypt, ctx, &fingerprint, None);
                Ok((encrypted, record))
            }
            Err(e) => {
                let record =
                    self.audit_record(AuditOperation::Encrypt, ctx, &fingerprint, Some(e.to_string()));
                // The encryption error is the one to report.
                let _ = self.store(&record);
                Err(e)
            }
        }
    }

    fn encrypt_payload(
        &self,
        ctx: &AuditContext,
        info: &ContactInfo,
        fingerprint: &mut String,
    ) -> Result<EncryptedContactInfo> {
        let key = self.active_key(ctx)?;
        *fingerprint = key.fingerprint.clone();

        let plaintext = Zeroizing::new(
            serde_json::to_vec(info).map_err(|e| ExchangeError::Encryption(e.to_string()))?,
        );
        let envelope = self.seal(&key, &plaintext)?;

        Ok(EncryptedContactInfo {
            ciphertext: envelope.to_base64(),
            key_fingerprint: key.fingerprint,
            preferred_method: info.preferred_method,
            restrictions: info.restrictions.clone(),
        })
    }

    /// Decrypt a payload produced by [`EncryptionEngine::encrypt_contact_info`],
    /// under whichever key it names.
    pub fn decrypt_contact_info(
        &self,
        ctx: &AuditContext,
        encrypted: Option<&EncryptedContactInfo>,
    ) -> Result<ContactInfo> {
        self.audited(AuditOperation::Decrypt, ctx, |fingerprint| {
            let encrypted = encrypted.ok_or(ExchangeError::NoContactInfo)?;
            *fingerprint = encrypted.key_fingerprint.clone();

            let envelope = Envelope::from_base64(&encrypted.ciphertext)
                .map_err(|e| ExchangeError::Decryption(e.to_string()))?;
            if envelope.key_fingerprint != encrypted.key_fingerprint {
                return Err(ExchangeError::IntegrityMismatch);
            }

            let plaintext = self.open(&envelope)?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| ExchangeError::Decryption(format!("invalid payload: {e}")))
        })
    }

    // --- Tokens ----------------------------------------------------------

    /// Issue a token carrying `info` until `expires_at`.
    pub fn generate_contact_token(
        &self,
        ctx: &AuditContext,
        info: &ContactInfo,
        expires_at: u64,
    ) -> Result<ContactToken> {
        self.audited(AuditOperation::TokenCreate, ctx, |fingerprint| {
            let now = self.clock.now();
            if expires_at <= now {
                return Err(ExchangeError::InvalidInput(
                    "token expiry must be in the future".into(),
                ));
            }

            let key = self.active_key(ctx)?;
            *fingerprint = key.fingerprint.clone();

            let mut nonce = [0u8; TOKEN_NONCE_LEN];
            rand::rngs::OsRng.fill_bytes(&mut nonce);
            let payload = TokenPayload {
                nonce: hex::encode(nonce),
                contact: info.clone(),
                created_at: now,
                expires_at,
            };
            let plaintext = Zeroizing::new(
                serde_json::to_vec(&payload)
                    .map_err(|e| ExchangeError::Encryption(e.to_string()))?,
            );

            let raw = self.seal(&key, &plaintext)?.to_bytes();
            Ok(ContactToken {
                token: STANDARD.encode(&raw),
                key_fingerprint: key.fingerprint,
                expires_at,
                created_at: now,
                integrity_hash: sha256::integrity_hash(&raw),
            })
        })
    }

    /// Check and open a token.
    ///
    /// Checks run cheapest first: expiry, then the integrity hash, and only
    /// then the key lookup and decryption.
    pub fn validate_contact_token(
        &self,
        ctx: &AuditContext,
        token: &ContactToken,
    ) -> Result<ContactInfo> {
        self.audited(AuditOperation::TokenValidate, ctx, |fingerprint| {
            *fingerprint = token.key_fingerprint.clone();

            if self.clock.now() > token.expires_at {
                return Err(ExchangeError::TokenExpired {
                    expires_at: token.expires_at,
                });
            }

            let raw = STANDARD
                .decode(&token.token)
                .map_err(|_| ExchangeError::IntegrityMismatch)?;
            if !sha256::verify_integrity(&raw, &token.integrity_hash) {
                return Err(ExchangeError::IntegrityMismatch);
            }

            let envelope =
                Envelope::from_bytes(&raw).map_err(|e| ExchangeError::Decryption(e.to_string()))?;
            if envelope.key_fingerprint != token.key_fingerprint {
                return Err(ExchangeError::IntegrityMismatch);
            }

            let plaintext = self.open(&envelope)?;
            let payload: TokenPayload = serde_json::from_slice(&plaintext)
                .map_err(|e| ExchangeError::Decryption(format!("invalid token payload: {e}")))?;

            // The outer timestamps are unauthenticated; the sealed ones rule.
            if payload.expires_at != token.expires_at || payload.created_at != token.created_at {
                return Err(ExchangeError::IntegrityMismatch);
            }
            Ok(payload.contact)
        })
    }

    // --- Keys ------------------------------------------------------------

    /// Replace the active key with a freshly generated one.
    ///
    /// Fails with [`ExchangeError::RotationConflict`] if another rotation
    /// changed the active key while this one was in flight.
    pub fn rotate_keys(&self, ctx: &AuditContext) -> Result<KeyInfo> {
        self.audited(AuditOperation::KeyRotation, ctx, |fingerprint| {
            let previous = match self.keys.active() {
                Ok(key) => Some(key.fingerprint),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };

            let mut key = self.generate_key()?;
            *fingerprint = key.fingerprint.clone();
            self.activate(&key.fingerprint, previous.as_deref())?;
            key.is_active = true;

            info!(
                previous = previous.as_deref().unwrap_or("none"),
                current = %key.fingerprint,
                "encryption key rotated"
            );
            Ok(key.info())
        })
    }

    /// Fingerprint of the active key, if one has been provisioned.
    pub fn active_key_fingerprint(&self) -> Result<Option<String>> {
        match self.keys.active() {
            Ok(key) => Ok(Some(key.fingerprint)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        Ok(self.keys.list()?.iter().map(EncryptionKey::info).collect())
    }

    // --- Audit -----------------------------------------------------------

    /// Record an operation refused before it reached the engine, for example
    /// a decrypt by someone who is not a party to the request.
    pub fn record_rejection(
        &self,
        operation: AuditOperation,
        ctx: &AuditContext,
        key_fingerprint: &str,
        reason: &ExchangeError,
    ) -> Result<()> {
        self.append(operation, ctx, key_fingerprint, Some(reason.to_string()))
    }

    /// Unstored record of an expired request's payload being purged, for the
    /// caller to commit together with the purge itself.
    pub fn purge_record(&self, ctx: &AuditContext, key_fingerprint: &str) -> AuditRecord {
        self.audit_record(AuditOperation::ContactPurge, ctx, key_fingerprint, None)
    }

    pub fn audit_trail(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        Ok(self.audit.query(query)?)
    }

    // --- Internals -------------------------------------------------------

    fn audited<T>(
        &self,
        operation: AuditOperation,
        ctx: &AuditContext,
        op: impl FnOnce(&mut String) -> Result<T>,
    ) -> Result<T> {
        let mut fingerprint = UNKNOWN_FINGERPRINT.to_string();
        let outcome = op(&mut fingerprint);
        let error_message = outcome.as_ref().err().map(|e| e.to_string());

        match (
            self.append(operation, ctx, &fingerprint, error_message),
            outcome,
        ) {
            (Ok(()), outcome) => outcome,
            (Err(audit_err), Ok(_)) => Err(audit_err),
            // The operation already failed; its error is the one to report.
            (Err(_), Err(op_err)) => Err(op_err),
        }
    }

    fn append(
        &self,
        operation: AuditOperation,
        ctx: &AuditContext,
        key_fingerprint: &str,
        error_message: Option<String>,
    ) -> Result<()> {
        self.store(&self.audit_record(operation, ctx, key_fingerprint, error_message))
    }

    fn audit_record(
        &self,
        operation: AuditOperation,
        ctx: &AuditContext,
        key_fingerprint: &str,
        error_message: Option<String>,
    ) -> AuditRecord {
        AuditRecord {
            id: AuditId::new(),
            operation,
            user_id: ctx.actor,
            request_id: ctx.request_id,
            key_fingerprint: key_fingerprint.to_string(),
            success: error_message.is_none(),
            error_message,
            timestamp: self.clock.now(),
            client: ctx.client.clone(),
        }
    }

    fn store(&self, record: &AuditRecord) -> Result<()> {
        self.audit.append(record).map_err(|e| {
            error!(operation = %record.operation, actor = %record.user_id, error = %e, "audit append failed");
            ExchangeError::Audit(e.to_string())
        })
    }

    /// The active key, provisioning the first one if the store is empty.
    fn active_key(&self, ctx: &AuditContext) -> Result<EncryptionKey> {
        match self.keys.active() {
            Ok(key) => return Ok(key),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let provisioned = self.audited(AuditOperation::KeyRotation, ctx, |fingerprint| {
            let mut key = self.generate_key()?;
            *fingerprint = key.fingerprint.clone();
            self.activate(&key.fingerprint, None)?;
            key.is_active = true;
            info!(fingerprint = %key.fingerprint, "provisioned initial encryption key");
            Ok(key)
        });

        match provisioned {
            Ok(key) => Ok(key),
            // Someone else provisioned first; use theirs.
            Err(ExchangeError::RotationConflict(_)) => Ok(self.keys.active()?),
            Err(e) => Err(e),
        }
    }

    /// Generate a key pair and store it, inactive, with its private half sealed.
    fn generate_key(&self) -> Result<EncryptionKey> {
        let secret = X25519StaticSecret::random();
        let public_key = secret.public_key();
        let raw_secret = Zeroizing::new(secret.to_bytes());
        let sealed_private_key = self
            .protector
            .seal(raw_secret.as_slice())
            .map_err(|e| ExchangeError::KeyManagement(e.to_string()))?;

        let key = EncryptionKey {
            id: KeyId::new(),
            fingerprint: sha256::fingerprint(public_key.as_bytes()),
            public_key: public_key.to_bytes().to_vec(),
            sealed_private_key,
            is_active: false,
            created_at: self.clock.now(),
            expires_at: None,
        };
        self.keys.save(&key)?;
        Ok(key)
    }

    fn activate(&self, fingerprint: &str, expected_previous: Option<&str>) -> Result<()> {
        self.keys
            .activate(fingerprint, expected_previous)
            .map_err(|e| match e {
                StoreError::Conflict(msg) => ExchangeError::RotationConflict(msg),
                other => other.into(),
            })
    }

    fn seal(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<Envelope> {
        let public_key = X25519PublicKey::from_slice(&key.public_key)
            .map_err(|e| ExchangeError::KeyManagement(e.to_string()))?;
        envelope::seal(&public_key, &key.fingerprint, plaintext)
            .map_err(|e| ExchangeError::Encryption(e.to_string()))
    }

    fn open(&self, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>> {
        let key = self
            .keys
            .by_fingerprint(&envelope.key_fingerprint)
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    ExchangeError::UnknownKey(envelope.key_fingerprint.clone())
                }
                other => other.into(),
            })?;

        let raw_secret = self
            .protector
            .open(&key.sealed_private_key)
            .map_err(|e| ExchangeError::KeyManagement(e.to_string()))?;
        let secret = X25519StaticSecret::from_slice(&raw_secret)
            .map_err(|e| ExchangeError::KeyManagement(e.to_string()))?;

        envelope::open(&secret, envelope).map_err(|e| ExchangeError::Decryption(e.to_string()))
    }
}
