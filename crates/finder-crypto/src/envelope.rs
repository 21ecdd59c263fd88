//! Hybrid (envelope) encryption of arbitrary-length payloads.
//!
//! A fresh 256-bit data key encrypts the payload with ChaCha20-Poly1305; only
//! that data key is wrapped to the long-lived X25519 key with [`ecies`]. The
//! payload size is therefore unbounded by the asymmetric primitive.
//!
//! ## Wire format (v1)
//!
//! ```text
//! version (1) || fp_len (1) || fingerprint (fp_len, ASCII hex)
//!   || wrapped_key (80) || nonce (12) || ciphertext || tag (16)
//! ```
//!
//! The version and fingerprint are authenticated as associated data of both
//! the key wrap and the payload encryption, so an envelope cannot be
//! re-labelled to point at a different key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::blake3::encode_multi_field;
use crate::chacha20;
use crate::ecies::{self, EciesCiphertext, WRAPPED_KEY_SIZE};
use crate::x25519::{X25519PublicKey, X25519StaticSecret};
use crate::{CryptoError, Result};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// A sealed payload plus everything needed to open it given the right key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    /// Fingerprint of the key pair the data key was wrapped to.
    pub key_fingerprint: String,
    pub wrapped_key: EciesCiphertext,
    pub nonce: [u8; chacha20::NONCE_SIZE],
    /// Payload ciphertext with appended tag.
    pub ciphertext: Vec<u8>,
}

fn payload_aad(version: u8, key_fingerprint: &str) -> Vec<u8> {
    encode_multi_field(&[&[version], key_fingerprint.as_bytes()])
}

/// Seal `plaintext` to `recipient_pk`, labelled with `key_fingerprint`.
pub fn seal(
    recipient_pk: &X25519PublicKey,
    key_fingerprint: &str,
    plaintext: &[u8],
) -> Result<Envelope> {
    if key_fingerprint.is_empty() || key_fingerprint.len() > u8::MAX as usize {
        return Err(CryptoError::InvalidInput(
            "key fingerprint must be 1..=255 bytes".into(),
        ));
    }

    let data_key = chacha20::generate_key();
    let nonce = chacha20::generate_nonce();
    let aad = payload_aad(ENVELOPE_VERSION, key_fingerprint);

    let ciphertext = chacha20::encrypt(&data_key, &nonce, plaintext, &aad)?;
    let wrapped_key = ecies::encrypt(recipient_pk, data_key.as_slice(), &aad)?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        key_fingerprint: key_fingerprint.to_string(),
        wrapped_key,
        nonce,
        ciphertext,
    })
}

/// Open an envelope with the private half of the key it names.
pub fn open(recipient_sk: &X25519StaticSecret, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope.version));
    }
    let aad = payload_aad(envelope.version, &envelope.key_fingerprint);

    let unwrapped = ecies::decrypt(recipient_sk, &envelope.wrapped_key, &aad)?;
    let data_key: Zeroizing<[u8; chacha20::KEY_SIZE]> = Zeroizing::new(
        unwrapped
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: chacha20::KEY_SIZE,
                actual: unwrapped.len(),
            })?,
    );

    chacha20::decrypt(&data_key, &envelope.nonce, &envelope.ciphertext, &aad).map(Zeroizing::new)
}

impl Envelope {
    /// Serialize to the v1 wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let fp = self.key_fingerprint.as_bytes();
        let wrapped = self.wrapped_key.to_bytes();
        let mut out = Vec::with_capacity(
            2 + fp.len() + wrapped.len() + chacha20::NONCE_SIZE + self.ciphertext.len(),
        );
        out.push(self.version);
        out.push(fp.len() as u8);
        out.extend_from_slice(fp);
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the v1 wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let malformed = |what: &str| CryptoError::Malformed(format!("envelope: {what}"));

        let (&version, rest) = data.split_first().ok_or_else(|| malformed("empty"))?;
        if version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let (&fp_len, rest) = rest.split_first().ok_or_else(|| malformed("missing fingerprint"))?;
        let fp_len = fp_len as usize;
        if fp_len == 0 || rest.len() < fp_len + WRAPPED_KEY_SIZE + chacha20::NONCE_SIZE + chacha20::TAG_SIZE {
            return Err(malformed("truncated"));
        }

        let (fp, rest) = rest.split_at(fp_len);
        let key_fingerprint =
            String::from_utf8(fp.to_vec()).map_err(|_| malformed("fingerprint is not UTF-8"))?;
        let (wrapped, rest) = rest.split_at(WRAPPED_KEY_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(chacha20::NONCE_SIZE);

        let mut nonce = [0u8; chacha20::NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            version,
            key_fingerprint,
            wrapped_key: EciesCiphertext::from_bytes(wrapped)?,
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Standard base64 of the wire format, for text columns and JSON.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Inverse of [`Envelope::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}
