//! Pool metadata types.
//!
//! A pool is an owner-controlled on-chain account that funds payment
//! orchestration. Three tiers form a strict funding hierarchy:
//! Legacy (root, funded from the owner wallet) → Main (agent bridge) →
//! Custom (per-agent). Tier is immutable after creation.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Lamports, PoolId, TimestampMs};

// ── PoolType ─────────────────────────────────────────────────────────────────

/// The three pool tiers. Funding edges are restricted to
/// Legacy→Main and Main→Custom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    /// Root tier: funded exclusively from the owner's wallet. Never deleted.
    Legacy,
    /// Agent bridge: funded exclusively from Legacy. Never deleted.
    Main,
    /// Per-agent tier: funded exclusively from Main. Deletable when no
    /// agents remain linked.
    Custom,
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Legacy => "Legacy",
            PoolType::Main => "Main",
            PoolType::Custom => "Custom",
        }
    }
}

// ── FundingState ─────────────────────────────────────────────────────────────

/// Created → Funded on the first observed on-chain balance above the funded
/// threshold; Funded → Active on the first successful outbound payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingState {
    Created,
    Funded,
    Active,
}

// ── EncryptedSecret ──────────────────────────────────────────────────────────

/// AES-256-CBC ciphertext of the 64-byte pool secret, with the per-pool salt
/// and per-encryption IV needed to reverse it given the owner's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 16],
    pub salt: [u8; 16],
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// Durable pool metadata as persisted in the registry.
///
/// `encrypted_secret` is `None` while the pool is locked (key material purged
/// after a restart and not yet unlocked by a fresh owner signature).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub public_key: Address,
    pub owner: Address,
    pub pool_type: PoolType,
    /// Owner-assigned display name.
    pub name: String,
    pub encrypted_secret: Option<EncryptedSecret>,
    pub funding_state: FundingState,
    pub total_payments: u64,
    pub total_sol_recovered: Lamports,
    /// Number of agents currently linked (Custom pools only; gates deletion).
    #[serde(default)]
    pub agent_count: u32,
    /// The Recovery Pool bound to this pool, if one has been initialised.
    #[serde(default)]
    pub recovery_pool: Option<Address>,
    pub created_at: TimestampMs,
}

impl Pool {
    pub fn new(
        public_key: Address,
        owner: Address,
        pool_type: PoolType,
        encrypted_secret: EncryptedSecret,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: PoolId::from_public_key(&public_key),
            public_key,
            owner,
            pool_type,
            name: format!("{} pool", pool_type.as_str()),
            encrypted_secret: Some(encrypted_secret),
            funding_state: FundingState::Created,
            total_payments: 0,
            total_sol_recovered: 0,
            agent_count: 0,
            recovery_pool: None,
            created_at: now,
        }
    }

    /// A pool is locked when its secret has been purged and not re-encrypted.
    pub fn is_locked(&self) -> bool {
        self.encrypted_secret.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_id_is_stable_function_of_public_key() {
        let pk = Address::from_bytes([7u8; 32]);
        assert_eq!(PoolId::from_public_key(&pk), PoolId::from_public_key(&pk));
        let other = Address::from_bytes([8u8; 32]);
        assert_ne!(PoolId::from_public_key(&pk), PoolId::from_public_key(&other));
    }

    #[test]
    fn new_pool_starts_created_and_unlocked() {
        let pk = Address::from_bytes([1u8; 32]);
        let owner = Address::from_bytes([2u8; 32]);
        let secret = EncryptedSecret {
            ciphertext: vec![0u8; 80],
            iv: [0u8; 16],
            salt: [0u8; 16],
        };
        let pool = Pool::new(pk, owner, PoolType::Legacy, secret, 1_700_000_000_000);
        assert_eq!(pool.funding_state, FundingState::Created);
        assert!(!pool.is_locked());
        assert_eq!(pool.id, PoolId::from_public_key(&pk));
    }
}
