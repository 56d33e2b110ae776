use sha2::{Digest, Sha256};

/// Compute SHA-256 over the concatenation of `parts` → 32-byte array.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash an agent API key for at-rest storage. The raw key never touches disk.
pub fn api_key_hash(raw_key: &str) -> [u8; 32] {
    blake3_hash(raw_key.as_bytes())
}
