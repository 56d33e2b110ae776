pub mod hash;
pub mod keypair;
pub mod vault;

pub use hash::{api_key_hash, blake3_hash, sha256_concat};
pub use keypair::{verify_signature, KeyPair};
pub use vault::{decrypt_secret, derive_pool_keypair, encrypt_secret, unlock};
