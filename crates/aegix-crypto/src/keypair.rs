use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use zeroize::Zeroizing;

use aegix_core::error::AegixError;
use aegix_core::types::Address;

/// An Ed25519 keypair addressed by its public key.
///
/// The 64-byte secret form is `seed ‖ public_key` (the conventional wallet
/// layout). Seed material is wiped on drop.
pub struct KeyPair {
    pub address: Address,
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair (burners, session authorities).
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(seed.as_mut());
        Self::from_seed(&seed)
    }

    /// Deterministically build a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let address = Address::from_bytes(signing.verifying_key().to_bytes());
        Self { address, signing }
    }

    /// Restore from the 64-byte secret form, verifying the embedded public
    /// half matches the seed-derived one.
    pub fn from_secret_bytes(secret: &[u8; 64]) -> Result<Self, AegixError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&secret[..32]);
        let kp = Self::from_seed(&seed);
        if kp.address.as_bytes() != &secret[32..] {
            return Err(AegixError::SignatureMismatch);
        }
        Ok(kp)
    }

    /// The 64-byte secret form `seed ‖ public_key`. Callers must zeroize.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 64]> {
        let mut out = Zeroizing::new([0u8; 64]);
        out[..32].copy_from_slice(&self.signing.to_bytes());
        out[32..].copy_from_slice(self.address.as_bytes());
        out
    }

    /// Sign `message` with this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            signing: self.signing.clone(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

/// Verify an Ed25519 signature by `signer` over `message`.
pub fn verify_signature(
    signer: &Address,
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), AegixError> {
    let vk = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|_| AegixError::SignatureInvalid)?;
    let sig = Signature::from_bytes(signature);
    vk.verify(message, &sig)
        .map_err(|_| AegixError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        verify_signature(&kp.address, b"hello", &sig).unwrap();
        assert!(verify_signature(&kp.address, b"tampered", &sig).is_err());
    }

    #[test]
    fn secret_bytes_restore_bit_for_bit() {
        let kp = KeyPair::generate();
        let secret = kp.secret_bytes();
        let restored = KeyPair::from_secret_bytes(&secret).unwrap();
        assert_eq!(restored.address, kp.address);
        assert_eq!(*restored.secret_bytes(), *secret);
    }

    #[test]
    fn corrupted_public_half_is_rejected() {
        let kp = KeyPair::generate();
        let mut secret = *kp.secret_bytes();
        secret[40] ^= 0xff;
        assert!(KeyPair::from_secret_bytes(&secret).is_err());
    }
}
