//! Domain-separated BLAKE3 key derivation.
//!
//! BLAKE3 is used only as a KDF inside the key-wrapping and key-at-rest
//! constructions. Every derivation goes through a registered context string so
//! that keys derived for one purpose can never collide with another.

/// Registered BLAKE3 context strings.
pub mod contexts {
    pub const ECIES_WRAP_KEY: &str = "Finder v1 ecies-wrap-key";
    pub const ECIES_NONCE: &str = "Finder v1 ecies-nonce";
    pub const KEY_AT_REST: &str = "Finder v1 key-at-rest";
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "Finder v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    let hash = hasher.finalize();
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}
