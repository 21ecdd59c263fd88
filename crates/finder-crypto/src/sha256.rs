//! SHA-256 fingerprints and integrity hashes.
//!
//! Key fingerprints identify a key pair across rotations; integrity hashes
//! let a token holder detect tampering before any decryption is attempted.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Deterministic fingerprint of a public key: lowercase hex SHA-256.
pub fn fingerprint(public_key: &[u8]) -> String {
    hex::encode(digest(public_key))
}

/// Integrity hash of a ciphertext: lowercase hex SHA-256.
pub fn integrity_hash(ciphertext: &[u8]) -> String {
    hex::encode(digest(ciphertext))
}

/// Compare two byte strings without early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check `expected` against the integrity hash of `ciphertext`.
pub fn verify_integrity(ciphertext: &[u8], expected: &str) -> bool {
    constant_time_eq(integrity_hash(ciphertext).as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            integrity_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let pk = [0x07u8; 32];
        assert_eq!(fingerprint(&pk), fingerprint(&pk));
        assert_ne!(fingerprint(&pk), fingerprint(&[0x08u8; 32]));
        assert_eq!(fingerprint(&pk).len(), 64);
    }

    #[test]
    fn test_verify_integrity() {
        let ct = b"ciphertext bytes";
        let hash = integrity_hash(ct);
        assert!(verify_integrity(ct, &hash));
        assert!(!verify_integrity(b"ciphertext byteS", &hash));
        assert!(!verify_integrity(ct, "00"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"samf"));
        assert!(!constant_time_eq(b"same", b"sam"));
    }
}
