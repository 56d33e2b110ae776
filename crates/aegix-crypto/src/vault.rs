//! The KeyVault: deterministic pool derivation and signature-gated
//! encryption of pool secrets at rest.
//!
//! Pool identity is a pure function of `(owner, signature)` — losing the
//! encrypted secret is recoverable by re-signing the same challenge. The
//! 64-byte secret is stored AES-256-CBC encrypted under a key derived from
//! the signature and a per-pool salt; every successful unlock re-encrypts
//! under a fresh salt bound to the current session's signature, so a single
//! captured signature does not permanently unlock the pool.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use zeroize::Zeroizing;

use aegix_core::constants::POOL_SEED_PREFIX;
use aegix_core::error::AegixError;
use aegix_core::pool::EncryptedSecret;
use aegix_core::types::Address;

use crate::hash::sha256_concat;
use crate::keypair::KeyPair;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// ── Derivation ───────────────────────────────────────────────────────────────

/// Derive the pool keypair for `(owner, signature)`:
/// `seed = SHA-256("aegix-pool:" ‖ owner ‖ signature)`.
pub fn derive_pool_keypair(owner: &Address, signature: &[u8; 64]) -> KeyPair {
    let seed = Zeroizing::new(sha256_concat(&[
        POOL_SEED_PREFIX,
        owner.as_bytes(),
        signature,
    ]));
    KeyPair::from_seed(&seed)
}

// ── Encryption at rest ───────────────────────────────────────────────────────

fn cipher_key(owner: &Address, signature: &[u8; 64], salt: &[u8; 16]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(sha256_concat(&[owner.as_bytes(), signature, salt]))
}

/// Encrypt a 64-byte pool secret under `(owner, signature)` with a fresh
/// random salt and IV.
pub fn encrypt_secret(secret: &[u8; 64], owner: &Address, signature: &[u8; 64]) -> EncryptedSecret {
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let key = cipher_key(owner, signature, &salt);
    let ciphertext = Aes256CbcEnc::new((&*key).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(secret);

    EncryptedSecret {
        ciphertext,
        iv,
        salt,
    }
}

/// Decrypt a stored pool secret with `(owner, signature)` and the stored
/// salt. Fails with `Cipher` on padding/corruption errors.
pub fn decrypt_secret(
    enc: &EncryptedSecret,
    owner: &Address,
    signature: &[u8; 64],
) -> Result<Zeroizing<[u8; 64]>, AegixError> {
    let key = cipher_key(owner, signature, &enc.salt);
    let plain = Aes256CbcDec::new((&*key).into(), (&enc.iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(&enc.ciphertext)
        .map_err(|e| AegixError::Cipher(e.to_string()))?;
    let plain = Zeroizing::new(plain);
    if plain.len() != 64 {
        return Err(AegixError::Cipher(format!(
            "expected 64-byte secret, got {}",
            plain.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&plain);
    Ok(out)
}

// ── Unlock protocol ──────────────────────────────────────────────────────────

/// Attempt to recover a pool keypair from `(owner, signature)`.
///
/// Strategy A decrypts the stored ciphertext (pools whose secret was sealed
/// under this same signature). Strategy B re-derives deterministically and
/// accepts iff the derived public key matches the stored one. Either way the
/// secret is re-encrypted under a fresh salt for the presented signature.
///
/// If both strategies fail the pool is unrecoverable; the error carries the
/// public key as a recovery hint so the owner can import it externally.
pub fn unlock(
    public_key: &Address,
    stored: Option<&EncryptedSecret>,
    owner: &Address,
    signature: &[u8; 64],
) -> Result<(KeyPair, EncryptedSecret), AegixError> {
    // Strategy A: stored-ciphertext decryption.
    if let Some(enc) = stored {
        if let Ok(secret) = decrypt_secret(enc, owner, signature) {
            if let Ok(kp) = KeyPair::from_secret_bytes(&secret) {
                if kp.address == *public_key {
                    let fresh = encrypt_secret(&secret, owner, signature);
                    return Ok((kp, fresh));
                }
            }
        }
    }

    // Strategy B: deterministic re-derivation.
    let derived = derive_pool_keypair(owner, signature);
    if derived.address == *public_key {
        let secret = derived.secret_bytes();
        let fresh = encrypt_secret(&secret, owner, signature);
        return Ok((derived, fresh));
    }

    Err(AegixError::PoolUnrecoverable {
        public_key: public_key.to_b58(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroize;

    fn owner_and_sig() -> (KeyPair, [u8; 64]) {
        let owner = KeyPair::generate();
        let sig = owner.sign(b"AEGIX_CREATE_POOL::owner::1700000000000");
        (owner, sig)
    }

    #[test]
    fn derivation_is_deterministic() {
        let (owner, sig) = owner_and_sig();
        let a = derive_pool_keypair(&owner.address, &sig);
        let b = derive_pool_keypair(&owner.address, &sig);
        assert_eq!(a.address, b.address);
        assert_eq!(*a.secret_bytes(), *b.secret_bytes());

        let other_sig = owner.sign(b"different message");
        let c = derive_pool_keypair(&owner.address, &other_sig);
        assert_ne!(a.address, c.address);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);
        let secret = pool.secret_bytes();

        let enc = encrypt_secret(&secret, &owner.address, &sig);
        let dec = decrypt_secret(&enc, &owner.address, &sig).unwrap();
        assert_eq!(*dec, *secret);
    }

    #[test]
    fn re_encryption_changes_ciphertext_but_preserves_secret() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);
        let secret = pool.secret_bytes();

        let enc1 = encrypt_secret(&secret, &owner.address, &sig);
        let enc2 = encrypt_secret(&secret, &owner.address, &sig);
        assert_ne!(enc1, enc2, "fresh salt and IV per encryption");
        assert_eq!(
            *decrypt_secret(&enc1, &owner.address, &sig).unwrap(),
            *decrypt_secret(&enc2, &owner.address, &sig).unwrap(),
        );
    }

    #[test]
    fn unlock_strategy_a_stored_ciphertext() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);
        let enc = encrypt_secret(&pool.secret_bytes(), &owner.address, &sig);

        let (kp, fresh) = unlock(&pool.address, Some(&enc), &owner.address, &sig).unwrap();
        assert_eq!(kp.address, pool.address);
        assert_ne!(fresh, enc, "unlock re-encrypts under a fresh salt");
    }

    #[test]
    fn unlock_strategy_b_rederivation_without_ciphertext() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);

        let (kp, _fresh) = unlock(&pool.address, None, &owner.address, &sig).unwrap();
        assert_eq!(*kp.secret_bytes(), *pool.secret_bytes(), "bit-for-bit");
    }

    #[test]
    fn unlock_reports_unrecoverable_with_public_key_hint() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);
        let mut wrong_sig = sig;
        wrong_sig[0] ^= 0xff;

        let err = unlock(&pool.address, None, &owner.address, &wrong_sig).unwrap_err();
        match err {
            AegixError::PoolUnrecoverable { public_key } => {
                assert_eq!(public_key, pool.address.to_b58());
            }
            other => panic!("expected PoolUnrecoverable, got {other:?}"),
        }
    }

    #[test]
    fn unlock_with_stale_ciphertext_falls_back_to_rederivation() {
        let (owner, sig) = owner_and_sig();
        let pool = derive_pool_keypair(&owner.address, &sig);

        // Ciphertext sealed under an older, different signature.
        let old_sig = owner.sign(b"older session");
        let mut secret = *pool.secret_bytes();
        let stale = encrypt_secret(&secret, &owner.address, &old_sig);
        secret.zeroize();

        let (kp, _fresh) = unlock(&pool.address, Some(&stale), &owner.address, &sig).unwrap();
        assert_eq!(kp.address, pool.address);
    }
}
