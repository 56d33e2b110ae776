//! aegix-recovery
//!
//! Recovery-pool resource accounting. Each owner's Recovery Pool is an
//! independent native-gas account that subsidises burner token-account rent
//! and decompression fees, and receives reclaimed rent and swept dust.
//!
//! Two guards protect it: an atomic liquidity reservation table (no
//! decompress proceeds without a reservation, and releases run on every
//! exit path) and a sliding-window rate limit keyed on the Recovery Pool
//! address — burner keypairs are one-shot and free to generate, so keying
//! on the burner would allow unbounded drain.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aegix_core::constants::{
    DECOMPRESS_RATE_LIMIT, RATE_LIMIT_WINDOW_SECS, RESERVATION_EPSILON_LAMPORTS,
};
use aegix_core::error::AegixError;
use aegix_core::types::{Address, Lamports, ReservationId, TimestampMs};
use aegix_crypto::keypair::KeyPair;
use aegix_store::GatewayStore;

const WINDOW_MS: i64 = RATE_LIMIT_WINDOW_SECS * 1000;

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub address: Address,
    pub balance: Lamports,
    pub reserved: Lamports,
    pub available: Lamports,
    pub total_recovered: Lamports,
}

// ── Per-pool state ───────────────────────────────────────────────────────────

struct PoolState {
    keypair: KeyPair,
    /// Last observed on-chain balance.
    balance: Lamports,
    pending: HashMap<ReservationId, Lamports>,
    /// Timestamps of recent decompress operations, oldest first.
    window: VecDeque<TimestampMs>,
    total_recovered: Lamports,
}

impl PoolState {
    fn reserved(&self) -> Lamports {
        self.pending.values().sum()
    }
}

// ── RecoveryPoolManager ──────────────────────────────────────────────────────

pub struct RecoveryPoolManager {
    store: Arc<GatewayStore>,
    pools: Mutex<HashMap<Address, PoolState>>,
}

impl RecoveryPoolManager {
    /// Load persisted recovery keypairs and rebuild the mirror file.
    pub fn open(store: Arc<GatewayStore>) -> Result<Self, AegixError> {
        let mut pools = HashMap::new();
        for owner in store.iter_recovery_key_owners()? {
            if let Some(secret) = store.get_recovery_key(&owner)? {
                let keypair = KeyPair::from_secret_bytes(&secret)?;
                pools.insert(
                    owner,
                    PoolState {
                        keypair,
                        balance: 0,
                        pending: HashMap::new(),
                        window: VecDeque::new(),
                        total_recovered: 0,
                    },
                );
            }
        }
        Ok(Self {
            store,
            pools: Mutex::new(pools),
        })
    }

    /// Initialise (or return) the owner's Recovery Pool address. The address
    /// is mirrored into an independent file so recovery pools survive even
    /// when the pool registry is empty.
    pub fn init(&self, owner: &Address) -> Result<Address, AegixError> {
        let mut pools = self.pools.lock().expect("recovery lock");
        if let Some(state) = pools.get(owner) {
            return Ok(state.keypair.address);
        }

        let keypair = KeyPair::generate();
        let address = keypair.address;
        self.store.put_recovery_key(owner, &keypair.secret_bytes())?;
        pools.insert(
            *owner,
            PoolState {
                keypair,
                balance: 0,
                pending: HashMap::new(),
                window: VecDeque::new(),
                total_recovered: 0,
            },
        );
        drop(pools);

        self.persist_mirror()?;
        info!(owner = %owner.short(), recovery = %address.short(), "recovery pool initialised");
        Ok(address)
    }

    fn persist_mirror(&self) -> Result<(), AegixError> {
        let pools = self.pools.lock().expect("recovery lock");
        let mirror = pools
            .iter()
            .map(|(owner, state)| (owner.to_b58(), state.keypair.address.to_b58()))
            .collect();
        drop(pools);
        self.store.save_recovery_mirror(&mirror)
    }

    /// Signing keypair for the owner's Recovery Pool.
    pub fn keypair(&self, owner: &Address) -> Result<KeyPair, AegixError> {
        let pools = self.pools.lock().expect("recovery lock");
        let state = pools.get(owner).ok_or(AegixError::RecoveryPoolMissing)?;
        KeyPair::from_secret_bytes(&state.keypair.secret_bytes())
    }

    pub fn address(&self, owner: &Address) -> Result<Address, AegixError> {
        let pools = self.pools.lock().expect("recovery lock");
        Ok(pools
            .get(owner)
            .ok_or(AegixError::RecoveryPoolMissing)?
            .keypair
            .address)
    }

    /// Record the latest observed on-chain balance.
    pub fn sync_balance(&self, owner: &Address, balance: Lamports) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("recovery lock");
        let state = pools.get_mut(owner).ok_or(AegixError::RecoveryPoolMissing)?;
        state.balance = balance;
        Ok(())
    }

    // ── Liquidity reservation ────────────────────────────────────────────────

    /// Atomically reserve `amount` for `id`: the check
    /// `balance − Σ reservations ≥ amount + ε` and the insertion run in one
    /// critical section.
    pub fn reserve(
        &self,
        owner: &Address,
        amount: Lamports,
        id: ReservationId,
    ) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("recovery lock");
        let state = pools.get_mut(owner).ok_or(AegixError::RecoveryPoolMissing)?;
        let available = state.balance.saturating_sub(state.reserved());
        if available < amount.saturating_add(RESERVATION_EPSILON_LAMPORTS) {
            return Err(AegixError::InsufficientRecoveryLiquidity {
                need: amount + RESERVATION_EPSILON_LAMPORTS,
                available,
            });
        }
        state.pending.insert(id, amount);
        debug!(reservation = %id, amount, "liquidity reserved");
        Ok(())
    }

    /// Release a reservation. Invoked on every exit path; releasing an
    /// unknown id is a no-op so double-release is harmless.
    pub fn release(&self, owner: &Address, id: &ReservationId) {
        if let Ok(mut pools) = self.pools.lock() {
            if let Some(state) = pools.get_mut(owner) {
                if state.pending.remove(id).is_some() {
                    debug!(reservation = %id, "liquidity released");
                }
            }
        }
    }

    // ── Decompress rate limit ────────────────────────────────────────────────

    /// Admit one decompress operation at `now`, or reject with the retry
    /// horizon. The window is keyed on the Recovery Pool address.
    pub fn admit_decompress(&self, owner: &Address, now: TimestampMs) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("recovery lock");
        let state = pools.get_mut(owner).ok_or(AegixError::RecoveryPoolMissing)?;

        while let Some(front) = state.window.front() {
            if now - front >= WINDOW_MS {
                state.window.pop_front();
            } else {
                break;
            }
        }
        if state.window.len() >= DECOMPRESS_RATE_LIMIT as usize {
            let oldest = *state.window.front().unwrap_or(&now);
            let retry_after_secs = ((oldest + WINDOW_MS - now) / 1000).max(1);
            return Err(AegixError::RateLimited { retry_after_secs });
        }
        state.window.push_back(now);
        Ok(())
    }

    // ── Counters / status ────────────────────────────────────────────────────

    /// Credit rent or dust recovered back into the pool.
    pub fn record_recovered(&self, owner: &Address, lamports: Lamports) {
        if let Ok(mut pools) = self.pools.lock() {
            if let Some(state) = pools.get_mut(owner) {
                state.total_recovered = state.total_recovered.saturating_add(lamports);
                state.balance = state.balance.saturating_add(lamports);
            }
        }
    }

    pub fn status(&self, owner: &Address) -> Result<RecoveryStatus, AegixError> {
        let pools = self.pools.lock().expect("recovery lock");
        let state = pools.get(owner).ok_or(AegixError::RecoveryPoolMissing)?;
        let reserved = state.reserved();
        Ok(RecoveryStatus {
            address: state.keypair.address,
            balance: state.balance,
            reserved,
            available: state.balance.saturating_sub(reserved),
            total_recovered: state.total_recovered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_manager(name: &str) -> (RecoveryPoolManager, Address) {
        let dir = std::env::temp_dir().join(format!("aegix_recovery_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store = Arc::new(GatewayStore::open(&dir).unwrap());
        let manager = RecoveryPoolManager::open(store).unwrap();
        let owner = Address::from_bytes([5u8; 32]);
        manager.init(&owner).unwrap();
        (manager, owner)
    }

    #[test]
    fn init_is_idempotent() {
        let (manager, owner) = temp_manager("init");
        let a = manager.init(&owner).unwrap();
        let b = manager.init(&owner).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reservations_respect_balance_and_epsilon() {
        let (manager, owner) = temp_manager("reserve");
        manager
            .sync_balance(&owner, 10_000_000 + RESERVATION_EPSILON_LAMPORTS)
            .unwrap();

        let first = ReservationId::generate();
        manager.reserve(&owner, 6_000_000, first).unwrap();

        // 4M remain above epsilon; 5M must be refused.
        let err = manager
            .reserve(&owner, 5_000_000, ReservationId::generate())
            .unwrap_err();
        assert!(matches!(err, AegixError::InsufficientRecoveryLiquidity { .. }));

        manager.reserve(&owner, 4_000_000, ReservationId::generate()).unwrap();

        // Releasing frees headroom again.
        manager.release(&owner, &first);
        manager.reserve(&owner, 5_000_000, ReservationId::generate()).unwrap();
    }

    #[test]
    fn release_of_unknown_id_is_harmless() {
        let (manager, owner) = temp_manager("release");
        manager.release(&owner, &ReservationId::generate());
    }

    #[test]
    fn decompress_rate_limit_slides() {
        let (manager, owner) = temp_manager("ratelimit");
        let t0: TimestampMs = 1_700_000_000_000;

        for i in 0..DECOMPRESS_RATE_LIMIT as i64 {
            manager.admit_decompress(&owner, t0 + i).unwrap();
        }
        assert!(matches!(
            manager.admit_decompress(&owner, t0 + 100),
            Err(AegixError::RateLimited { .. })
        ));

        // One window later the oldest entries have expired.
        manager.admit_decompress(&owner, t0 + WINDOW_MS).unwrap();
    }

    #[test]
    fn recovered_rent_feeds_balance_and_counter() {
        let (manager, owner) = temp_manager("recovered");
        manager.sync_balance(&owner, 1_000).unwrap();
        manager.record_recovered(&owner, 2_039_280);
        let status = manager.status(&owner).unwrap();
        assert_eq!(status.total_recovered, 2_039_280);
        assert_eq!(status.balance, 1_000 + 2_039_280);
    }

    #[test]
    fn keys_survive_reopen_via_store() {
        let dir = std::env::temp_dir().join("aegix_recovery_test_reopen");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let owner = Address::from_bytes([5u8; 32]);

        let address = {
            let store = Arc::new(GatewayStore::open(&dir).unwrap());
            let manager = RecoveryPoolManager::open(store).unwrap();
            manager.init(&owner).unwrap()
        };
        let store = Arc::new(GatewayStore::open(&dir).unwrap());
        let manager = RecoveryPoolManager::open(store).unwrap();
        assert_eq!(manager.address(&owner).unwrap(), address);
    }
}
