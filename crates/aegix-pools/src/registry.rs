//! The pool registry: three-tier hierarchy enforcement, two-phase custom
//! creation, deterministic unlock, inter-pool funding edges, and
//! signature-gated key export.
//!
//! Every privileged mutation verifies the owner signature before any state
//! change. Per-registry writes run inside one lock for bounded sections;
//! on-chain waits happen outside it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use aegix_chain::rpc::ChainRpc;
use aegix_chain::tx::{token_account_address, Instruction, PreparedTransaction};
use aegix_core::challenge::Challenge;
use aegix_core::constants::{
    BALANCE_REFRESH_SECS, CONFIRM_TIMEOUT_SECS, DIRECT_BURNER_FUND_LAMPORTS,
    FUNDED_THRESHOLD_MICROS, MAIN_CREATE_MIN_LEGACY_LAMPORTS,
};
use aegix_core::error::AegixError;
use aegix_core::pool::{FundingState, Pool, PoolType};
use aegix_core::types::{Address, ChainSignature, Lamports, MicroUnits, PoolId, TimestampMs};
use aegix_crypto::keypair::{verify_signature, KeyPair};
use aegix_crypto::vault;
use aegix_sealed::SealedStore;
use aegix_store::GatewayStore;

// ── Reports ──────────────────────────────────────────────────────────────────

/// Outcome of one unlock attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnlockReport {
    Unlocked,
    /// Neither stored-ciphertext decryption nor re-derivation matched; the
    /// public key is the recovery hint for an external import.
    Unrecoverable { public_key: String },
}

/// An on-chain account the owner signed for with no registry entry —
/// typically a custom-pool commit that crashed between confirmation and
/// persistence.
#[derive(Clone, Debug)]
pub struct OrphanReport {
    pub public_key: Address,
    pub lamports: Lamports,
}

/// Pool metadata plus throttled on-chain balances.
#[derive(Clone, Debug)]
pub struct PoolStats {
    pub pool: Pool,
    pub lamports: Lamports,
    pub asset_micros: MicroUnits,
}

struct PendingPool {
    pool: Pool,
    keypair: KeyPair,
}

// ── PoolRegistry ─────────────────────────────────────────────────────────────

pub struct PoolRegistry {
    store: Arc<GatewayStore>,
    sealed: Arc<dyn SealedStore>,
    chain: Arc<dyn ChainRpc>,
    mint: Address,
    pools: Mutex<HashMap<PoolId, Pool>>,
    /// Runtime cache of decrypted pool keypairs. Pools absent here are
    /// "locked" — metadata known, key material not.
    unlocked: Mutex<HashMap<PoolId, KeyPair>>,
    /// Two-phase custom creations awaiting on-chain confirmation.
    pending: Mutex<HashMap<PoolId, PendingPool>>,
    balance_cache: Mutex<HashMap<Address, (Instant, Lamports, MicroUnits)>>,
}

impl PoolRegistry {
    /// Load persisted pools. Everything starts locked until the owner
    /// presents a fresh signature.
    pub fn open(
        store: Arc<GatewayStore>,
        sealed: Arc<dyn SealedStore>,
        chain: Arc<dyn ChainRpc>,
        mint: Address,
    ) -> Result<Self, AegixError> {
        let registry = Self {
            store,
            sealed,
            chain,
            mint,
            pools: Mutex::new(HashMap::new()),
            unlocked: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            balance_cache: Mutex::new(HashMap::new()),
        };
        {
            let mut pools = registry.pools.lock().expect("pool lock");
            for pool in registry.store.iter_all_pools()? {
                pools.insert(pool.id, pool);
            }
        }
        Ok(registry)
    }

    pub fn mint(&self) -> Address {
        self.mint
    }

    fn find_by_type(&self, owner: &Address, pool_type: PoolType) -> Option<Pool> {
        self.pools
            .lock()
            .expect("pool lock")
            .values()
            .find(|p| p.owner == *owner && p.pool_type == pool_type)
            .cloned()
    }

    pub fn get(&self, id: &PoolId) -> Result<Pool, AegixError> {
        self.pools
            .lock()
            .expect("pool lock")
            .get(id)
            .cloned()
            .ok_or_else(|| AegixError::PoolNotFound(id.to_hex()))
    }

    /// The decrypted keypair for an unlocked pool.
    pub fn unlocked_keypair(&self, id: &PoolId) -> Result<KeyPair, AegixError> {
        self.unlocked
            .lock()
            .expect("unlock cache lock")
            .get(id)
            .cloned()
            .ok_or_else(|| AegixError::PoolLocked(id.to_hex()))
    }

    fn commit(&self, pool: Pool, keypair: Option<KeyPair>) -> Result<(), AegixError> {
        self.store.put_pool(&pool)?;
        if let Some(kp) = keypair {
            self.unlocked.lock().expect("unlock cache lock").insert(pool.id, kp);
        }
        self.pools.lock().expect("pool lock").insert(pool.id, pool);
        Ok(())
    }

    async fn bind_sealed(&self, pool: &Pool) -> Result<(), AegixError> {
        self.sealed
            .put(
                &pool.owner,
                &format!("pool:{}", pool.id),
                pool.public_key.to_b58().as_bytes(),
            )
            .await
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Idempotent Legacy creation/unlock from a signature over
    /// `AEGIX_CREATE_POOL::{owner}::{ts}`.
    pub async fn get_or_create_legacy(
        &self,
        owner: Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<Pool, AegixError> {
        let challenge = Challenge::CreatePool {
            owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(&owner, challenge.render().as_bytes(), signature)?;

        if let Some(existing) = self.find_by_type(&owner, PoolType::Legacy) {
            // Re-presenting the creation signature doubles as the unlock.
            if self.unlocked_keypair(&existing.id).is_err() {
                self.unlock_pool(&existing.id, &owner, signature)?;
            }
            return self.get(&existing.id);
        }

        let keypair = vault::derive_pool_keypair(&owner, signature);
        let encrypted = vault::encrypt_secret(&keypair.secret_bytes(), &owner, signature);
        let pool = Pool::new(keypair.address, owner, PoolType::Legacy, encrypted, now);

        self.bind_sealed(&pool).await?;
        self.commit(pool.clone(), Some(keypair))?;
        info!(pool = %pool.id, owner = %owner.short(), "legacy pool created");
        Ok(pool)
    }

    /// Main creation from `AEGIX_MAIN_POOL::{owner}::{ts}`. Requires a
    /// Legacy pool whose balance clears the documented minimum; returns a
    /// Legacy→Main funding transaction on first creation.
    pub async fn get_or_create_main(
        &self,
        owner: Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<(Pool, Option<PreparedTransaction>), AegixError> {
        let challenge = Challenge::MainPool {
            owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(&owner, challenge.render().as_bytes(), signature)?;

        let legacy = self
            .find_by_type(&owner, PoolType::Legacy)
            .ok_or(AegixError::LegacyPoolMissing)?;

        if let Some(existing) = self.find_by_type(&owner, PoolType::Main) {
            if self.unlocked_keypair(&existing.id).is_err() {
                self.unlock_pool(&existing.id, &owner, signature)?;
            }
            return Ok((existing, None));
        }

        // The minimum-balance check is unconditional at creation time.
        let legacy_balance = self.chain.get_balance(&legacy.public_key).await?;
        if legacy_balance < MAIN_CREATE_MIN_LEGACY_LAMPORTS {
            return Err(AegixError::LegacyBalanceBelowMinimum {
                need: MAIN_CREATE_MIN_LEGACY_LAMPORTS,
                have: legacy_balance,
            });
        }

        let keypair = vault::derive_pool_keypair(&owner, signature);
        let encrypted = vault::encrypt_secret(&keypair.secret_bytes(), &owner, signature);
        let pool = Pool::new(keypair.address, owner, PoolType::Main, encrypted, now);

        let funding = self
            .funding_tx(&legacy, &pool.public_key, DIRECT_BURNER_FUND_LAMPORTS)
            .await?;

        self.bind_sealed(&pool).await?;
        self.commit(pool.clone(), Some(keypair))?;
        info!(pool = %pool.id, owner = %owner.short(), "main pool created");
        Ok((pool, Some(funding)))
    }

    /// Phase one of Custom creation from `AEGIX_CUSTOM_POOL::{owner}::{ts}`:
    /// derive the pool and return the Main→Custom funding transaction. The
    /// pool is persisted only by [`PoolRegistry::confirm_custom`].
    pub async fn create_custom(
        &self,
        owner: Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<(Pool, PreparedTransaction), AegixError> {
        let challenge = Challenge::CustomPool {
            owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(&owner, challenge.render().as_bytes(), signature)?;

        let main = self
            .find_by_type(&owner, PoolType::Main)
            .ok_or(AegixError::MainPoolMissing)?;
        // The bridge must have confirmed funding before it can fan out.
        if main.funding_state == FundingState::Created {
            return Err(AegixError::PoolUnconfirmed(main.id.to_hex()));
        }

        let keypair = vault::derive_pool_keypair(&owner, signature);
        let encrypted = vault::encrypt_secret(&keypair.secret_bytes(), &owner, signature);
        let pool = Pool::new(keypair.address, owner, PoolType::Custom, encrypted, now);

        let funding = self
            .funding_tx(&main, &pool.public_key, DIRECT_BURNER_FUND_LAMPORTS)
            .await?;

        self.pending.lock().expect("pending lock").insert(
            pool.id,
            PendingPool {
                pool: pool.clone(),
                keypair,
            },
        );
        Ok((pool, funding))
    }

    /// Phase two: commit the pending Custom pool once its funding
    /// transaction confirms on-chain.
    pub async fn confirm_custom(
        &self,
        pool_id: &PoolId,
        tx_signature: &ChainSignature,
        owner: &Address,
    ) -> Result<Pool, AegixError> {
        let (pool, keypair) = {
            let pending = self.pending.lock().expect("pending lock");
            let entry = pending
                .get(pool_id)
                .ok_or_else(|| AegixError::PoolNotFound(pool_id.to_hex()))?;
            if entry.pool.owner != *owner {
                return Err(AegixError::NotOwner);
            }
            (entry.pool.clone(), entry.keypair.clone())
        };

        self.chain
            .confirm(tx_signature, Duration::from_secs(CONFIRM_TIMEOUT_SECS))
            .await?;

        self.bind_sealed(&pool).await?;
        self.commit(pool.clone(), Some(keypair))?;
        self.pending.lock().expect("pending lock").remove(pool_id);
        info!(pool = %pool.id, "custom pool confirmed");
        Ok(pool)
    }

    // ── Funding edges ────────────────────────────────────────────────────────

    async fn funding_tx(
        &self,
        source: &Pool,
        target: &Address,
        lamports: Lamports,
    ) -> Result<PreparedTransaction, AegixError> {
        let source_kp = self.unlocked_keypair(&source.id)?;
        let mut tx = PreparedTransaction::new(
            source.public_key,
            vec![Instruction::TransferLamports {
                from: source.public_key,
                to: *target,
                lamports,
            }],
        );
        let (hash, height) = self.chain.latest_blockhash().await?;
        tx.set_blockhash(hash, height);
        tx.partial_sign(&source_kp)?;
        Ok(tx)
    }

    /// Inter-pool asset funding, authorised by
    /// `AEGIX_FUND_POOL::{src}::{tgt}::{amount}::{ts}`. The only accepted
    /// edges are Legacy→Main and Main→Custom.
    #[allow(clippy::too_many_arguments)]
    pub async fn fund_from_pool(
        &self,
        source_id: &PoolId,
        target_id: &PoolId,
        amount: MicroUnits,
        owner: &Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<PreparedTransaction, AegixError> {
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let source = self.get(source_id)?;
        let target = self.get(target_id)?;
        if source.owner != *owner || target.owner != *owner {
            return Err(AegixError::NotOwner);
        }

        let challenge = Challenge::FundPool {
            source: source.public_key,
            target: target.public_key,
            amount,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(owner, challenge.render().as_bytes(), signature)?;

        match (source.pool_type, target.pool_type) {
            (PoolType::Legacy, PoolType::Main) | (PoolType::Main, PoolType::Custom) => {}
            (s, t) => {
                return Err(AegixError::FundingEdgeForbidden {
                    edge_source: s.as_str().to_string(),
                    target: t.as_str().to_string(),
                })
            }
        }

        let source_kp = self.unlocked_keypair(source_id)?;
        let mut tx = PreparedTransaction::new(
            source.public_key,
            vec![Instruction::TransferChecked {
                source: token_account_address(&source.public_key, &self.mint),
                destination: token_account_address(&target.public_key, &self.mint),
                authority: source.public_key,
                mint: self.mint,
                amount,
                decimals: 6,
            }],
        );
        let (hash, height) = self.chain.latest_blockhash().await?;
        tx.set_blockhash(hash, height);
        tx.partial_sign(&source_kp)?;
        Ok(tx)
    }

    /// Owner deposit/withdraw against the Legacy tier, authorised by
    /// `AEGIX_TRANSFER::{src}::{tgt}::{amount}::{ts}`. A transfer out of a
    /// pool is signed here; a deposit from the owner wallet is returned
    /// unsigned for the wallet to sign.
    #[allow(clippy::too_many_arguments)]
    pub async fn build_transfer(
        &self,
        source: &Address,
        target: &Address,
        amount: MicroUnits,
        owner: &Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<PreparedTransaction, AegixError> {
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let challenge = Challenge::Transfer {
            source: *source,
            target: *target,
            amount,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(owner, challenge.render().as_bytes(), signature)?;

        let legacy = self
            .find_by_type(owner, PoolType::Legacy)
            .ok_or(AegixError::LegacyPoolMissing)?;
        if *source != legacy.public_key && *target != legacy.public_key {
            return Err(AegixError::FundingEdgeForbidden {
                edge_source: source.short(),
                target: target.short(),
            });
        }

        let mut tx = PreparedTransaction::new(
            *source,
            vec![Instruction::TransferChecked {
                source: token_account_address(source, &self.mint),
                destination: token_account_address(target, &self.mint),
                authority: *source,
                mint: self.mint,
                amount,
                decimals: 6,
            }],
        );
        let (hash, height) = self.chain.latest_blockhash().await?;
        tx.set_blockhash(hash, height);
        if *source == legacy.public_key {
            tx.partial_sign(&self.unlocked_keypair(&legacy.id)?)?;
        }
        Ok(tx)
    }

    // ── Deletion ─────────────────────────────────────────────────────────────

    /// Delete a Custom pool, authorised by
    /// `AEGIX_DELETE_POOL::{pool_id}::{owner}::{ts}`. Legacy and Main are
    /// immutable roots; a Custom pool with linked agents is refused.
    #[allow(clippy::too_many_arguments)]
    pub async fn delete_custom(
        &self,
        pool_id: &PoolId,
        owner: &Address,
        linked_agents: u32,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<(), AegixError> {
        let pool = self.get(pool_id)?;
        if pool.owner != *owner {
            return Err(AegixError::NotOwner);
        }

        let challenge = Challenge::DeletePool {
            pool_id: *pool_id,
            owner: *owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(owner, challenge.render().as_bytes(), signature)?;

        if pool.pool_type != PoolType::Custom {
            return Err(AegixError::ImmutableRootPool);
        }
        if linked_agents > 0 {
            return Err(AegixError::PoolHasAgents {
                agents: linked_agents,
            });
        }

        self.sealed.remove(owner, &format!("pool:{pool_id}")).await?;
        self.store.delete_pool(pool_id)?;
        self.pools.lock().expect("pool lock").remove(pool_id);
        self.unlocked.lock().expect("unlock cache lock").remove(pool_id);
        info!(pool = %pool_id, "custom pool deleted");
        Ok(())
    }

    // ── Listing / stats ──────────────────────────────────────────────────────

    /// Enumerate the owner's pools through the sealed map.
    pub async fn list(&self, owner: &Address) -> Result<Vec<Pool>, AegixError> {
        let keys = self.sealed.list_keys(owner, "pool:").await?;
        let mut result = Vec::new();
        for key in keys {
            let id = PoolId::from_hex(key.trim_start_matches("pool:"))?;
            if let Some(pool) = self.pools.lock().expect("pool lock").get(&id).cloned() {
                result.push(pool);
            }
        }
        Ok(result)
    }

    /// Balances for a pool, throttled to one refresh per address per
    /// [`BALANCE_REFRESH_SECS`]. Observing a funded balance advances the
    /// funding state.
    pub async fn stats(&self, pool_id: &PoolId) -> Result<PoolStats, AegixError> {
        let pool = self.get(pool_id)?;

        if let Some((at, lamports, micros)) = self
            .balance_cache
            .lock()
            .expect("balance cache lock")
            .get(&pool.public_key)
            .copied()
        {
            if at.elapsed() < Duration::from_secs(BALANCE_REFRESH_SECS) {
                return Ok(PoolStats {
                    pool,
                    lamports,
                    asset_micros: micros,
                });
            }
        }

        let lamports = self.chain.get_balance(&pool.public_key).await?;
        let ata = token_account_address(&pool.public_key, &self.mint);
        let micros = self.chain.get_token_balance(&ata).await.unwrap_or(0);
        self.balance_cache
            .lock()
            .expect("balance cache lock")
            .insert(pool.public_key, (Instant::now(), lamports, micros));

        if pool.funding_state == FundingState::Created && micros > FUNDED_THRESHOLD_MICROS {
            self.transition_funding(pool_id, FundingState::Funded)?;
        }
        let pool = self.get(pool_id)?;
        Ok(PoolStats {
            pool,
            lamports,
            asset_micros: micros,
        })
    }

    /// Confirm a pool's funding transaction on-chain and advance
    /// Created → Funded.
    pub async fn confirm_funding(
        &self,
        pool_id: &PoolId,
        tx_signature: &ChainSignature,
    ) -> Result<(), AegixError> {
        self.chain
            .confirm(tx_signature, Duration::from_secs(CONFIRM_TIMEOUT_SECS))
            .await?;
        let pool = self.get(pool_id)?;
        if pool.funding_state == FundingState::Created {
            self.transition_funding(pool_id, FundingState::Funded)?;
        }
        Ok(())
    }

    fn transition_funding(&self, pool_id: &PoolId, state: FundingState) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.funding_state = state;
            self.store.put_pool(pool)?;
        }
        Ok(())
    }

    /// Record a completed outbound payment: bumps the counter and moves
    /// Funded → Active on the first one.
    pub fn note_payment(&self, pool_id: &PoolId) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.total_payments += 1;
            if pool.funding_state != FundingState::Active {
                pool.funding_state = FundingState::Active;
            }
            self.store.put_pool(pool)?;
        }
        Ok(())
    }

    pub fn record_sol_recovered(&self, pool_id: &PoolId, lamports: Lamports) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.total_sol_recovered = pool.total_sol_recovered.saturating_add(lamports);
            self.store.put_pool(pool)?;
        }
        Ok(())
    }

    pub fn set_recovery_pool(&self, pool_id: &PoolId, recovery: Address) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.recovery_pool = Some(recovery);
            self.store.put_pool(pool)?;
        }
        Ok(())
    }

    pub fn update_name(&self, pool_id: &PoolId, owner: &Address, name: String) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        let pool = pools
            .get_mut(pool_id)
            .ok_or_else(|| AegixError::PoolNotFound(pool_id.to_hex()))?;
        if pool.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        pool.name = name;
        self.store.put_pool(pool)
    }

    pub fn link_agent(&self, pool_id: &PoolId, delta: i32) -> Result<(), AegixError> {
        let mut pools = self.pools.lock().expect("pool lock");
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.agent_count = (pool.agent_count as i64 + delta as i64).max(0) as u32;
            self.store.put_pool(pool)?;
        }
        Ok(())
    }

    // ── Unlock ───────────────────────────────────────────────────────────────

    /// Unlock one pool with a fresh `(owner, signature)`. Success
    /// re-encrypts the secret under a fresh salt bound to this signature.
    /// Unlocking an already-unlocked pool is idempotent.
    pub fn unlock_pool(
        &self,
        pool_id: &PoolId,
        owner: &Address,
        signature: &[u8; 64],
    ) -> Result<UnlockReport, AegixError> {
        let pool = self.get(pool_id)?;
        if pool.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        if self.unlocked.lock().expect("unlock cache lock").contains_key(pool_id) {
            return Ok(UnlockReport::Unlocked);
        }

        match vault::unlock(
            &pool.public_key,
            pool.encrypted_secret.as_ref(),
            owner,
            signature,
        ) {
            Ok((keypair, fresh)) => {
                {
                    let mut pools = self.pools.lock().expect("pool lock");
                    if let Some(p) = pools.get_mut(pool_id) {
                        p.encrypted_secret = Some(fresh);
                        self.store.put_pool(p)?;
                    }
                }
                self.unlocked
                    .lock()
                    .expect("unlock cache lock")
                    .insert(*pool_id, keypair);
                Ok(UnlockReport::Unlocked)
            }
            Err(AegixError::PoolUnrecoverable { public_key }) => {
                warn!(pool = %pool_id, "pool unrecoverable under presented signature");
                Ok(UnlockReport::Unrecoverable { public_key })
            }
            Err(e) => Err(e),
        }
    }

    /// Unlock every pool the owner has with one signature, reporting
    /// per-pool outcomes.
    pub fn unlock_all(
        &self,
        owner: &Address,
        signature: &[u8; 64],
    ) -> Result<Vec<(PoolId, UnlockReport)>, AegixError> {
        let ids: Vec<PoolId> = self
            .pools
            .lock()
            .expect("pool lock")
            .values()
            .filter(|p| p.owner == *owner)
            .map(|p| p.id)
            .collect();

        let mut reports = Vec::new();
        for id in ids {
            reports.push((id, self.unlock_pool(&id, owner, signature)?));
        }
        Ok(reports)
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Export a pool's base58-encoded secret. Released only against a
    /// signature over the exact challenge `DECRYPT_POOL_KEY_{pool_id}`;
    /// the secret itself is never logged.
    pub fn export_key(
        &self,
        pool_id: &PoolId,
        owner: &Address,
        decrypt_signature: &[u8; 64],
    ) -> Result<String, AegixError> {
        let pool = self.get(pool_id)?;
        if pool.owner != *owner {
            return Err(AegixError::NotOwner);
        }

        let challenge = Challenge::DecryptPoolKey { pool_id: *pool_id };
        verify_signature(owner, challenge.render().as_bytes(), decrypt_signature)?;

        let keypair = self.unlocked_keypair(pool_id)?;
        info!(pool = %pool_id, owner = %owner.short(), "pool key exported");
        Ok(bs58::encode(keypair.secret_bytes().as_ref()).into_string())
    }

    // ── Orphan reconciliation ────────────────────────────────────────────────

    /// Detect an on-chain account derived from `(owner, signature)` that
    /// never made it into the registry (a crashed two-phase commit).
    pub async fn reconcile(
        &self,
        owner: &Address,
        signature: &[u8; 64],
    ) -> Result<Option<OrphanReport>, AegixError> {
        let derived = vault::derive_pool_keypair(owner, signature);
        let known = self
            .pools
            .lock()
            .expect("pool lock")
            .values()
            .any(|p| p.public_key == derived.address);
        if known {
            return Ok(None);
        }
        let lamports = self.chain.get_balance(&derived.address).await?;
        if lamports == 0 {
            return Ok(None);
        }
        Ok(Some(OrphanReport {
            public_key: derived.address,
            lamports,
        }))
    }

    /// Import a reclaimable orphan as a pool of the given tier.
    pub async fn import_orphan(
        &self,
        owner: Address,
        signature: &[u8; 64],
        pool_type: PoolType,
        now: TimestampMs,
    ) -> Result<Pool, AegixError> {
        let keypair = vault::derive_pool_keypair(&owner, signature);
        let encrypted = vault::encrypt_secret(&keypair.secret_bytes(), &owner, signature);
        let pool = Pool::new(keypair.address, owner, pool_type, encrypted, now);
        self.bind_sealed(&pool).await?;
        self.commit(pool.clone(), Some(keypair))?;
        info!(pool = %pool.id, "orphan imported");
        Ok(pool)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
