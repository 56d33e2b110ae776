use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AegixError;

/// Stablecoin amount in micro-units (1 token = 1_000_000 micro-units).
pub type MicroUnits = u64;

/// Native gas amount in lamports (1 SOL = 1_000_000_000 lamports).
pub type Lamports = u64;

/// Wall-clock timestamp in milliseconds (UTC).
pub type TimestampMs = i64;

// ── Address ──────────────────────────────────────────────────────────────────

/// 32-byte chain address (an Ed25519 public key), base-58 encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, AegixError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AegixError::InvalidAddress(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(AegixError::InvalidAddress(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Short prefix for log output. Never log a full address next to secret
    /// material; this is the only form error paths are allowed to carry.
    pub fn short(&self) -> String {
        let b58 = self.to_b58();
        b58.chars().take(8).collect()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", self.short())
    }
}

// ── PoolId ───────────────────────────────────────────────────────────────────

/// 16-byte pool identifier: the first half of BLAKE3(pool public key).
///
/// Because the pool key itself is a pure function of `(owner, signature)`,
/// the id is stable across restarts and re-derivations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub [u8; 16]);

impl PoolId {
    pub fn from_public_key(pk: &Address) -> Self {
        let hash = blake3::hash(pk.as_bytes());
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&hash.as_bytes()[..16]);
        Self(arr)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, AegixError> {
        let bytes = hex::decode(s).map_err(|e| AegixError::InvalidIdentifier(e.to_string()))?;
        if bytes.len() != 16 {
            return Err(AegixError::InvalidIdentifier(format!(
                "expected 16 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", &self.to_hex()[..8])
    }
}

// ── Random 16-byte identifiers ────────────────────────────────────────────────

macro_rules! random_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                let mut arr = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut arr);
                Self(arr)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, AegixError> {
                let bytes =
                    hex::decode(s).map_err(|e| AegixError::InvalidIdentifier(e.to_string()))?;
                if bytes.len() != 16 {
                    return Err(AegixError::InvalidIdentifier(format!(
                        "expected 16 bytes, got {}",
                        bytes.len()
                    )));
                }
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "({})"), &self.to_hex()[..8])
            }
        }
    };
}

random_id!(AgentId, "AgentId");
random_id!(SessionId, "SessionId");
random_id!(ReservationId, "ReservationId");

// ── ChainSignature ────────────────────────────────────────────────────────────

/// A confirmed transaction signature as returned by the chain RPC
/// (base-58 encoded 64-byte Ed25519 signature).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainSignature(pub String);

impl ChainSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChainSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "ChainSignature({}…)", prefix)
    }
}
