//! # finder-crypto
//!
//! Cryptographic primitives for contact exchange.
//!
//! The suite is fixed; there is no algorithm negotiation.
//!
//! ## Modules
//!
//! - [`sha256`] - Key fingerprints and ciphertext integrity hashes
//! - [`blake3`] - Domain-separated BLAKE3 key derivation
//! - [`x25519`] - X25519 key pairs (RFC 7748)
//! - [`chacha20`] - ChaCha20-Poly1305 AEAD encryption (RFC 8439)
//! - [`ecies`] - Data-key wrapping to an X25519 public key
//! - [`envelope`] - Hybrid encryption of arbitrary-length payloads
//! - [`argon2id`] - Passphrase to key-encryption-key derivation
//! - [`secret`] - Sealing private keys at rest

pub mod argon2id;
pub mod blake3;
pub mod chacha20;
pub mod ecies;
pub mod envelope;
pub mod secret;
pub mod sha256;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    AeadEncryption,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Argon2id hashing failed.
    #[error("argon2id error: {0}")]
    Argon2(String),

    /// ECIES encryption/decryption failed.
    #[error("ECIES error: {0}")]
    Ecies(String),

    /// Encoded data could not be parsed.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Envelope carries a format version this build does not understand.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
