//! # finder-exchange
//!
//! Secure contact exchange between the parties of a lost/found post.
//!
//! This crate implements:
//!
//! - [`request`] - The `ContactExchangeRequest` aggregate and its state machine
//! - [`engine`] - Envelope encryption of contact details, expiring tokens,
//!   key rotation, with an audit entry for every operation
//! - [`ports`] - Storage and collaborator interfaces the core depends on
//! - [`memory`] - In-memory implementations of every port
//! - [`events`] - Broadcast event bus
//! - [`service`] - The orchestrator tying the above together
//! - [`clock`] - Time source abstraction
//!
//! ## Request Flow
//!
//! 1. A finder asks for the owner's contact details on a post (`pending`).
//! 2. The owner approves with their contact details, which are encrypted
//!    before the request is persisted as `approved`, or denies it.
//! 3. Either party may decrypt the details until the request expires.
//! 4. A sweep marks overdue requests `expired`; a second sweep purges the
//!    encrypted details of expired requests.

pub mod clock;
pub mod engine;
pub mod events;
pub mod memory;
pub mod ports;
pub mod request;
pub mod service;

use finder_crypto::CryptoError;
use finder_types::exchange::ExchangeStatus;
use finder_types::ids::UserId;

pub use ports::StoreError;

/// Coarse classification of [`ExchangeError`], for callers deciding how to
/// respond (reject, deny, alert, retry).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Crypto,
    Persistence,
}

/// Error types for contact exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("invalid post id")]
    InvalidPostId,

    #[error("invalid user id")]
    InvalidUserId,

    #[error("cannot request your own contact details")]
    SelfRequest,

    #[error("post is not active (status: {0})")]
    PostNotActive(String),

    /// The requested transition is not legal from the current status.
    #[error("cannot {action} a request that is {from}")]
    InvalidTransition {
        from: ExchangeStatus,
        action: &'static str,
    },

    #[error("request expired at {expires_at}")]
    AlreadyExpired { expires_at: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored record violates the aggregate's invariants.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("user {user} is not permitted to {action}")]
    Unauthorized { user: UserId, action: &'static str },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("no contact information present")]
    NoContactInfo,

    #[error("integrity check failed")]
    IntegrityMismatch,

    #[error("unknown key fingerprint {0}")]
    UnknownKey(String),

    #[error("token expired at {expires_at}")]
    TokenExpired { expires_at: u64 },

    /// Another rotation changed the active key first.
    #[error("key rotation conflict: {0}")]
    RotationConflict(String),

    #[error("key management failed: {0}")]
    KeyManagement(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The record changed between load and save.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The operation could not be written to the audit log.
    #[error("audit log unavailable: {0}")]
    Audit(String),
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::InvalidPostId
            | ExchangeError::InvalidUserId
            | ExchangeError::SelfRequest
            | ExchangeError::PostNotActive(_)
            | ExchangeError::InvalidTransition { .. }
            | ExchangeError::AlreadyExpired { .. }
            | ExchangeError::InvalidInput(_)
            | ExchangeError::InvalidRecord(_) => ErrorKind::Validation,

            ExchangeError::Unauthorized { .. } => ErrorKind::Authorization,

            ExchangeError::Encryption(_)
            | ExchangeError::Decryption(_)
            | ExchangeError::NoContactInfo
            | ExchangeError::IntegrityMismatch
            | ExchangeError::UnknownKey(_)
            | ExchangeError::TokenExpired { .. }
            | ExchangeError::RotationConflict(_)
            | ExchangeError::KeyManagement(_) => ErrorKind::Crypto,

            ExchangeError::NotFound(_)
            | ExchangeError::Conflict(_)
            | ExchangeError::Storage(_)
            | ExchangeError::Audit(_) => ErrorKind::Persistence,
        }
    }
}

impl From<StoreError> for ExchangeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ExchangeError::NotFound(what),
            StoreError::Conflict(what) => ExchangeError::Conflict(what),
            StoreError::Backend(msg) => ExchangeError::Storage(msg),
        }
    }
}

impl From<CryptoError> for ExchangeError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AeadEncryption | CryptoError::Ecies(_) => {
                ExchangeError::Encryption(e.to_string())
            }
            _ => ExchangeError::Decryption(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ExchangeError::SelfRequest.kind(), ErrorKind::Validation);
        assert_eq!(
            ExchangeError::Unauthorized {
                user: UserId::new(),
                action: "decrypt"
            }
            .kind(),
            ErrorKind::Authorization
        );
        assert_eq!(ExchangeError::IntegrityMismatch.kind(), ErrorKind::Crypto);
        assert_eq!(ExchangeError::Audit("down".into()).kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ExchangeError::from(StoreError::NotFound("request".into())),
            ExchangeError::NotFound(_)
        ));
        assert!(matches!(
            ExchangeError::from(StoreError::Conflict("status".into())),
            ExchangeError::Conflict(_)
        ));
    }

    #[test]
    fn test_transition_message() {
        let err = ExchangeError::InvalidTransition {
            from: ExchangeStatus::Denied,
            action: "approve",
        };
        assert_eq!(err.to_string(), "cannot approve a request that is denied");
    }
}
