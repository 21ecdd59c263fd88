//! Argon2id key derivation for key-encryption keys (KEKs).
//!
//! The operator passphrase is stretched into the 32-byte KEK that seals
//! private key material at rest (m=64MB, t=3, p=4).

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

/// Default memory cost in KiB (64 MB).
pub const KEK_M_COST: u32 = 65536;
pub const KEK_T_COST: u32 = 3;
pub const KEK_P_COST: u32 = 4;
pub const KEK_OUTPUT_LEN: usize = 32;

/// Salt length stored alongside sealed key material.
pub const SALT_LEN: usize = 16;

/// Cost parameters for a single derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: KEK_M_COST,
            t_cost: KEK_T_COST,
            p_cost: KEK_P_COST,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests. Never use these for real key material.
    pub fn insecure_for_tests() -> Self {
        Self {
            m_cost: 1024,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Derive a KEK from a passphrase with the default parameters.
///
/// # Arguments
///
/// * `passphrase` - Operator-supplied secret
/// * `salt` - Random salt persisted next to the sealed keys
pub fn derive_kek(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEK_OUTPUT_LEN]>> {
    derive_kek_with(passphrase, salt, KdfParams::default())
}

/// Derive a KEK with explicit cost parameters.
pub fn derive_kek_with(
    passphrase: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; KEK_OUTPUT_LEN]>> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidInput("empty passphrase".into()));
    }
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEK_OUTPUT_LEN))
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEK_OUTPUT_LEN]);
    argon2
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    Ok(output)
}

/// Generate a random salt for Argon2id.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
    salt
}
