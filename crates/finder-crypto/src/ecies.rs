//! ECIES-X25519-ChaCha20-BLAKE3 key wrapping.
//!
//! Wraps the short per-message data key of an [`envelope`](crate::envelope)
//! to the server's long-lived X25519 public key.
//!
//! ## Algorithm
//!
//! ```text
//! ECIES.Wrap(recipient_pk, data_key, aad; randomness):
//!   1. eph_sk = randomness
//!   2. eph_pk = X25519_basepoint_mult(eph_sk)
//!   3. shared_secret = X25519(eph_sk, recipient_pk)
//!   4. wrap_key = BLAKE3::derive_key("Finder v1 ecies-wrap-key",
//!                shared_secret || eph_pk || recipient_pk)
//!   5. nonce = BLAKE3::derive_key("Finder v1 ecies-nonce",
//!             shared_secret || eph_pk)[:12]
//!   6. wrapped = ChaCha20-Poly1305.Encrypt(wrap_key, nonce, data_key,
//!                aad = eph_pk || aad)
//!   7. return (eph_pk || wrapped || tag)
//! ```

use zeroize::Zeroizing;

use crate::blake3::{self, contexts};
use crate::chacha20;
use crate::x25519::{self, X25519PublicKey, X25519StaticSecret};
use crate::{CryptoError, Result};

/// Length of a wrapped 32-byte data key: eph_pk + key + tag.
pub const WRAPPED_KEY_SIZE: usize = 32 + chacha20::KEY_SIZE + chacha20::TAG_SIZE;

/// ECIES ciphertext: ephemeral public key + ciphertext + tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EciesCiphertext {
    /// The ephemeral public key (32 bytes).
    pub eph_pk: [u8; 32],
    /// The ciphertext with appended Poly1305 tag.
    pub ciphertext_and_tag: Vec<u8>,
}

impl EciesCiphertext {
    /// Serialize to bytes: eph_pk || ciphertext || tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.ciphertext_and_tag.len());
        out.extend_from_slice(&self.eph_pk);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 32 + chacha20::TAG_SIZE {
            return Err(CryptoError::Ecies("ciphertext too short".into()));
        }
        let mut eph_pk = [0u8; 32];
        eph_pk.copy_from_slice(&data[..32]);
        Ok(Self {
            eph_pk,
            ciphertext_and_tag: data[32..].to_vec(),
        })
    }
}

struct DerivedKeys {
    key: Zeroizing<[u8; 32]>,
    nonce: [u8; chacha20::NONCE_SIZE],
}

fn derive(shared: &[u8; 32], eph_pk: &[u8; 32], recipient_pk: &[u8; 32]) -> DerivedKeys {
    let mut key_material = Zeroizing::new(Vec::with_capacity(96));
    key_material.extend_from_slice(shared);
    key_material.extend_from_slice(eph_pk);
    key_material.extend_from_slice(recipient_pk);
    let key = Zeroizing::new(blake3::derive_key(contexts::ECIES_WRAP_KEY, &key_material));

    let mut nonce_material = Zeroizing::new(Vec::with_capacity(64));
    nonce_material.extend_from_slice(shared);
    nonce_material.extend_from_slice(eph_pk);
    let nonce_full = blake3::derive_key(contexts::ECIES_NONCE, &nonce_material);
    let mut nonce = [0u8; chacha20::NONCE_SIZE];
    nonce.copy_from_slice(&nonce_full[..chacha20::NONCE_SIZE]);

    DerivedKeys { key, nonce }
}

fn bound_aad(eph_pk: &[u8; 32], aad: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + aad.len());
    out.extend_from_slice(eph_pk);
    out.extend_from_slice(aad);
    out
}

/// Wrap with explicit randomness for the ephemeral key.
pub fn encrypt_deterministic(
    recipient_pk: &X25519PublicKey,
    plaintext: &[u8],
    aad: &[u8],
    randomness: &[u8; 32],
) -> Result<EciesCiphertext> {
    let eph_pk = x25519::basepoint_mult(randomness);
    let eph_secret = X25519StaticSecret::from_bytes(*randomness);
    let shared = eph_secret.diffie_hellman(recipient_pk);

    let derived = derive(shared.as_bytes(), &eph_pk, recipient_pk.as_bytes());
    let ciphertext_and_tag = chacha20::encrypt(
        &derived.key,
        &derived.nonce,
        plaintext,
        &bound_aad(&eph_pk, aad),
    )?;

    Ok(EciesCiphertext {
        eph_pk,
        ciphertext_and_tag,
    })
}

/// Wrap using a random ephemeral key.
pub fn encrypt(recipient_pk: &X25519PublicKey, plaintext: &[u8], aad: &[u8]) -> Result<EciesCiphertext> {
    let randomness = chacha20::generate_key();
    encrypt_deterministic(recipient_pk, plaintext, aad, &randomness)
}

/// Unwrap an ECIES ciphertext with the recipient's static secret.
pub fn decrypt(
    recipient_sk: &X25519StaticSecret,
    ciphertext: &EciesCiphertext,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let eph_pk = X25519PublicKey::from_bytes(ciphertext.eph_pk);
    let recipient_pk = recipient_sk.public_key();
    let shared = recipient_sk.diffie_hellman(&eph_pk);

    let derived = derive(shared.as_bytes(), &ciphertext.eph_pk, recipient_pk.as_bytes());
    chacha20::decrypt(
        &derived.key,
        &derived.nonce,
        &ciphertext.ciphertext_and_tag,
        &bound_aad(&ciphertext.eph_pk, aad),
    )
    .map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecies_roundtrip() {
        let sk = X25519StaticSecret::random();
        let pk = sk.public_key();

        let data_key = [0x11u8; 32];
        let ct = encrypt(&pk, &data_key, b"fp").expect("wrap");
        assert_eq!(ct.to_bytes().len(), WRAPPED_KEY_SIZE);

        let unwrapped = decrypt(&sk, &ct, b"fp").expect("unwrap");
        assert_eq!(unwrapped.as_slice(), &data_key);
    }

    #[test]
    fn test_ecies_deterministic() {
        let pk = X25519StaticSecret::random().public_key();
        let randomness = [0x01u8; 32];

        let ct1 = encrypt_deterministic(&pk, b"test", b"", &randomness).expect("wrap");
        let ct2 = encrypt_deterministic(&pk, b"test", b"", &randomness).expect("wrap");
        assert_eq!(ct1, ct2);
    }

    #[test]
    fn test_ecies_wrong_key_fails() {
        let sk1 = X25519StaticSecret::random();
        let sk2 = X25519StaticSecret::random();

        let ct = encrypt(&sk1.public_key(), b"test", b"").expect("wrap");
        assert!(decrypt(&sk2, &ct, b"").is_err());
    }

    #[test]
    fn test_ecies_aad_is_bound() {
        let sk = X25519StaticSecret::random();
        let ct = encrypt(&sk.public_key(), b"test", b"key-a").expect("wrap");
        assert!(decrypt(&sk, &ct, b"key-b").is_err());
    }

    #[test]
    fn test_ecies_serialization() {
        let sk = X25519StaticSecret::random();
        let ct = encrypt(&sk.public_key(), b"test data", b"").expect("wrap");
        let restored = EciesCiphertext::from_bytes(&ct.to_bytes()).expect("deserialize");
        let decrypted = decrypt(&sk, &restored, b"").expect("unwrap");
        assert_eq!(decrypted.as_slice(), b"test data");
    }

    #[test]
    fn test_ecies_too_short() {
        assert!(EciesCiphertext::from_bytes(&[0u8; 40]).is_err());
    }
}
