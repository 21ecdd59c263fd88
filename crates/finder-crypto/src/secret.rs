//! Protection of private key material at rest.
//!
//! Stores never see an unsealed private key: the key manager seals it through
//! a [`SecretProtector`] before persisting and opens it again on use.

use zeroize::Zeroizing;

use crate::argon2id::{self, KdfParams};
use crate::blake3::{self, contexts};
use crate::chacha20;
use crate::{CryptoError, Result};

/// Seals and opens secret bytes for storage.
pub trait SecretProtector: Send + Sync {
    /// Seal `secret`, returning an opaque blob.
    fn seal(&self, secret: &[u8]) -> Result<Vec<u8>>;

    /// Recover the secret from a blob produced by [`SecretProtector::seal`].
    fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// ChaCha20-Poly1305 under a key-encryption key.
///
/// Sealed layout: `nonce (12) || ciphertext || tag (16)`.
pub struct KekProtector {
    key: Zeroizing<[u8; chacha20::KEY_SIZE]>,
}

impl KekProtector {
    /// Use a raw 32-byte KEK. The sealing key is derived from it under the
    /// key-at-rest context.
    pub fn new(kek: &[u8; chacha20::KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(blake3::derive_key(contexts::KEY_AT_REST, kek)),
        }
    }

    /// Derive the KEK from an operator passphrase.
    pub fn from_passphrase(passphrase: &[u8], salt: &[u8]) -> Result<Self> {
        Self::from_passphrase_with(passphrase, salt, KdfParams::default())
    }

    /// Like [`KekProtector::from_passphrase`] with explicit Argon2id costs.
    pub fn from_passphrase_with(passphrase: &[u8], salt: &[u8], params: KdfParams) -> Result<Self> {
        let kek = argon2id::derive_kek_with(passphrase, salt, params)?;
        Ok(Self::new(&kek))
    }

    /// A protector with a fresh random KEK. Nothing it seals survives the
    /// process, which suits tests and ephemeral deployments.
    pub fn ephemeral() -> Self {
        Self::new(&chacha20::generate_key())
    }
}

impl SecretProtector for KekProtector {
    fn seal(&self, secret: &[u8]) -> Result<Vec<u8>> {
        let nonce = chacha20::generate_nonce();
        let ciphertext = chacha20::encrypt(&self.key, &nonce, secret, contexts::KEY_AT_REST.as_bytes())?;

        let mut out = Vec::with_capacity(chacha20::NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < chacha20::NONCE_SIZE + chacha20::TAG_SIZE {
            return Err(CryptoError::Malformed("sealed secret too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(chacha20::NONCE_SIZE);
        let mut nonce = [0u8; chacha20::NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        chacha20::decrypt(&self.key, &nonce, ciphertext, contexts::KEY_AT_REST.as_bytes())
            .map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let protector = KekProtector::new(&[7u8; 32]);
        let sealed = protector.seal(b"private key bytes").expect("seal");
        assert_ne!(&sealed[chacha20::NONCE_SIZE..], b"private key bytes".as_slice());
        assert_eq!(protector.open(&sealed).expect("open").as_slice(), b"private key bytes");
    }

    #[test]
    fn test_wrong_kek_fails() {
        let sealed = KekProtector::new(&[1u8; 32]).seal(b"secret").expect("seal");
        assert!(matches!(
            KekProtector::new(&[2u8; 32]).open(&sealed),
            Err(CryptoError::AeadDecryption)
        ));
    }

    #[test]
    fn test_passphrase_protector_is_reproducible() {
        let salt = argon2id::generate_salt();
        let params = KdfParams::insecure_for_tests();
        let a = KekProtector::from_passphrase_with(b"hunter2", &salt, params).expect("derive");
        let b = KekProtector::from_passphrase_with(b"hunter2", &salt, params).expect("derive");
        let sealed = a.seal(b"secret").expect("seal");
        assert_eq!(b.open(&sealed).expect("open").as_slice(), b"secret");
    }

    #[test]
    fn test_short_blob_rejected() {
        let protector = KekProtector::ephemeral();
        assert!(matches!(protector.open(&[0u8; 10]), Err(CryptoError::Malformed(_))));
    }
}
