//! aegix-agents
//!
//! Owner-scoped agent registry and the agent-authentication middleware.
//! Agents carry a BLAKE3-hashed API key (the raw key is returned once at
//! creation and otherwise only under owner-gated reveal through the sealed
//! map), per-agent spending caps that compose with session-key limits, and
//! a link to the Custom pool they spend from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tracing::info;

use aegix_core::agent::{AgentContext, AgentRecord, SpendingLimits};
use aegix_core::constants::SESSION_DAY_SECS;
use aegix_core::error::AegixError;
use aegix_core::types::{Address, AgentId, MicroUnits, PoolId, TimestampMs};
use aegix_crypto::hash::api_key_hash;
use aegix_sealed::SealedStore;
use aegix_store::GatewayStore;

const DAY_MS: i64 = SESSION_DAY_SECS * 1000;

/// Fields an owner may change after creation.
#[derive(Clone, Debug, Default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub paused: Option<bool>,
    pub limits: Option<SpendingLimits>,
    pub pool_link: Option<PoolId>,
}

pub struct AgentRegistry {
    store: Arc<GatewayStore>,
    sealed: Arc<dyn SealedStore>,
    agents: Mutex<HashMap<AgentId, AgentRecord>>,
    /// api_key_hash → agent id, for O(1) middleware lookups.
    key_index: Mutex<HashMap<[u8; 32], AgentId>>,
}

fn generate_raw_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("aegix_{}", hex::encode(bytes))
}

impl AgentRegistry {
    pub fn open(store: Arc<GatewayStore>, sealed: Arc<dyn SealedStore>) -> Result<Self, AegixError> {
        let mut agents = HashMap::new();
        let mut key_index = HashMap::new();
        for record in store.iter_agents()? {
            key_index.insert(record.api_key_hash, record.id);
            agents.insert(record.id, record);
        }
        Ok(Self {
            store,
            sealed,
            agents: Mutex::new(agents),
            key_index: Mutex::new(key_index),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Register an agent. The returned raw key is shown to the caller once;
    /// only its hash is persisted, and a sealed copy is kept for the
    /// owner-gated reveal path.
    pub async fn register(
        &self,
        owner: Address,
        name: String,
        limits: SpendingLimits,
        now: TimestampMs,
    ) -> Result<(AgentRecord, String), AegixError> {
        let raw_key = generate_raw_key();
        let record = AgentRecord {
            id: AgentId::generate(),
            owner,
            name,
            api_key_hash: api_key_hash(&raw_key),
            limits,
            pool_link: None,
            paused: false,
            created_at: now,
            last_active: None,
            spent_today: 0,
            day_start: now,
        };

        self.sealed
            .put(&owner, &format!("agent-key:{}", record.id), raw_key.as_bytes())
            .await?;
        self.store.put_agent(&record)?;
        {
            let mut agents = self.agents.lock().expect("agent lock");
            let mut key_index = self.key_index.lock().expect("agent key index lock");
            key_index.insert(record.api_key_hash, record.id);
            agents.insert(record.id, record.clone());
        }
        info!(agent = %record.id, owner = %owner.short(), "agent registered");
        Ok((record, raw_key))
    }

    /// Owner-gated reveal of the raw key through the sealed map.
    pub async fn reveal_key(&self, id: &AgentId, owner: &Address) -> Result<String, AegixError> {
        let record = self.get(id)?;
        if record.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        let bytes = self
            .sealed
            .get(owner, &format!("agent-key:{id}"))
            .await?
            .ok_or_else(|| AegixError::AgentNotFound(id.to_hex()))?;
        String::from_utf8(bytes).map_err(|e| AegixError::Sealed(e.to_string()))
    }

    /// Rotate the API key; the old key stops authenticating immediately.
    pub async fn regenerate_key(
        &self,
        id: &AgentId,
        owner: &Address,
    ) -> Result<String, AegixError> {
        let mut record = self.get(id)?;
        if record.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        let raw_key = generate_raw_key();
        let old_hash = record.api_key_hash;
        record.api_key_hash = api_key_hash(&raw_key);

        self.sealed
            .put(owner, &format!("agent-key:{id}"), raw_key.as_bytes())
            .await?;
        self.store.put_agent(&record)?;
        {
            let mut agents = self.agents.lock().expect("agent lock");
            let mut key_index = self.key_index.lock().expect("agent key index lock");
            key_index.remove(&old_hash);
            key_index.insert(record.api_key_hash, record.id);
            agents.insert(record.id, record);
        }
        Ok(raw_key)
    }

    pub fn patch(
        &self,
        id: &AgentId,
        owner: &Address,
        patch: AgentPatch,
    ) -> Result<AgentRecord, AegixError> {
        let mut agents = self.agents.lock().expect("agent lock");
        let record = agents
            .get_mut(id)
            .ok_or_else(|| AegixError::AgentNotFound(id.to_hex()))?;
        if record.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(paused) = patch.paused {
            record.paused = paused;
        }
        if let Some(limits) = patch.limits {
            record.limits = limits;
        }
        if let Some(pool_link) = patch.pool_link {
            record.pool_link = Some(pool_link);
        }
        self.store.put_agent(record)?;
        Ok(record.clone())
    }

    pub fn delete(&self, id: &AgentId, owner: &Address) -> Result<AgentRecord, AegixError> {
        let mut agents = self.agents.lock().expect("agent lock");
        let record = agents
            .get(id)
            .ok_or_else(|| AegixError::AgentNotFound(id.to_hex()))?;
        if record.owner != *owner {
            return Err(AegixError::NotOwner);
        }
        let record = agents.remove(id).expect("checked above");
        self.key_index
            .lock()
            .expect("agent key index lock")
            .remove(&record.api_key_hash);
        self.store.delete_agent(id)?;
        Ok(record)
    }

    pub fn get(&self, id: &AgentId) -> Result<AgentRecord, AegixError> {
        self.agents
            .lock()
            .expect("agent lock")
            .get(id)
            .cloned()
            .ok_or_else(|| AegixError::AgentNotFound(id.to_hex()))
    }

    pub fn list(&self, owner: &Address) -> Vec<AgentRecord> {
        let mut list: Vec<AgentRecord> = self
            .agents
            .lock()
            .expect("agent lock")
            .values()
            .filter(|a| a.owner == *owner)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.created_at);
        list
    }

    /// Agents linked to `pool` — gates Custom-pool deletion.
    pub fn count_linked(&self, pool: &PoolId) -> u32 {
        self.agents
            .lock()
            .expect("agent lock")
            .values()
            .filter(|a| a.pool_link == Some(*pool))
            .count() as u32
    }

    // ── Authentication middleware ────────────────────────────────────────────

    /// Validate a raw API key from the request header: unknown keys and
    /// paused agents are refused, last activity is recorded, and the
    /// `{agent_id, owner}` context is attached for downstream calls.
    pub fn authenticate(&self, raw_key: &str, now: TimestampMs) -> Result<AgentContext, AegixError> {
        let hash = api_key_hash(raw_key);
        let id = *self
            .key_index
            .lock()
            .expect("agent key index lock")
            .get(&hash)
            .ok_or(AegixError::AgentKeyInvalid)?;

        let mut agents = self.agents.lock().expect("agent lock");
        let record = agents
            .get_mut(&id)
            .ok_or(AegixError::AgentKeyInvalid)?;
        if record.paused {
            return Err(AegixError::AgentPaused(record.id.to_hex()));
        }
        record.last_active = Some(now);
        self.store.put_agent(record)?;
        Ok(AgentContext {
            agent_id: record.id,
            owner: record.owner,
        })
    }

    // ── Spending checks (compose with session-key limits) ────────────────────

    /// Atomically check `amount` against the agent's caps and allow-list
    /// and reserve it in the daily window, all inside one lock acquisition
    /// so concurrent payments cannot both pass the check. Both this and the
    /// session-key debit must pass before any on-chain action; a failed
    /// payment is returned via [`AgentRegistry::credit_spend`].
    pub fn debit_spend(
        &self,
        id: &AgentId,
        recipient: &Address,
        amount: MicroUnits,
        now: TimestampMs,
    ) -> Result<(), AegixError> {
        let mut agents = self.agents.lock().expect("agent lock");
        let record = agents
            .get_mut(id)
            .ok_or_else(|| AegixError::AgentNotFound(id.to_hex()))?;

        if !record.limits.allowed_resources.is_empty()
            && !record
                .limits
                .allowed_resources
                .iter()
                .any(|r| r == &recipient.to_b58())
        {
            return Err(AegixError::RecipientNotAllowed(recipient.short()));
        }
        if amount > record.limits.max_per_transaction {
            return Err(AegixError::PerTransactionCapExceeded {
                max: record.limits.max_per_transaction,
                got: amount,
            });
        }
        if now - record.day_start >= DAY_MS {
            let days = (now - record.day_start) / DAY_MS;
            record.day_start += days * DAY_MS;
            record.spent_today = 0;
        }
        if record.spent_today.saturating_add(amount) > record.limits.daily_limit {
            return Err(AegixError::LimitExceeded {
                remaining_daily: record.limits.daily_limit.saturating_sub(record.spent_today),
            });
        }
        record.spent_today += amount;
        self.store.put_agent(record)?;
        Ok(())
    }

    /// Return a reserved spend after a failed payment so the agent is not
    /// charged for value that never moved.
    pub fn credit_spend(&self, id: &AgentId, amount: MicroUnits) -> Result<(), AegixError> {
        let mut agents = self.agents.lock().expect("agent lock");
        if let Some(record) = agents.get_mut(id) {
            record.spent_today = record.spent_today.saturating_sub(amount);
            self.store.put_agent(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_sealed::MemorySealed;

    const NOW: TimestampMs = 1_700_000_000_000;

    fn registry(name: &str) -> AgentRegistry {
        let dir = std::env::temp_dir().join(format!("aegix_agents_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store = Arc::new(GatewayStore::open(&dir).unwrap());
        AgentRegistry::open(store, Arc::new(MemorySealed::new())).unwrap()
    }

    fn limits() -> SpendingLimits {
        SpendingLimits {
            max_per_transaction: 1_000_000,
            daily_limit: 3_000_000,
            allowed_resources: Vec::new(),
        }
    }

    fn owner() -> Address {
        Address::from_bytes([4u8; 32])
    }

    #[tokio::test]
    async fn register_and_authenticate() {
        let registry = registry("auth");
        let (record, raw_key) = registry
            .register(owner(), "payments-bot".into(), limits(), NOW)
            .await
            .unwrap();

        let ctx = registry.authenticate(&raw_key, NOW + 5).unwrap();
        assert_eq!(ctx.agent_id, record.id);
        assert_eq!(ctx.owner, owner());
        assert_eq!(registry.get(&record.id).unwrap().last_active, Some(NOW + 5));

        assert!(matches!(
            registry.authenticate("aegix_bogus", NOW),
            Err(AegixError::AgentKeyInvalid)
        ));
    }

    #[tokio::test]
    async fn paused_agents_are_refused() {
        let registry = registry("paused");
        let (record, raw_key) = registry
            .register(owner(), "bot".into(), limits(), NOW)
            .await
            .unwrap();
        registry
            .patch(
                &record.id,
                &owner(),
                AgentPatch {
                    paused: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            registry.authenticate(&raw_key, NOW),
            Err(AegixError::AgentPaused(_))
        ));
    }

    #[tokio::test]
    async fn reveal_is_owner_gated_and_regenerate_rotates() {
        let registry = registry("reveal");
        let (record, raw_key) = registry
            .register(owner(), "bot".into(), limits(), NOW)
            .await
            .unwrap();

        assert_eq!(registry.reveal_key(&record.id, &owner()).await.unwrap(), raw_key);
        let stranger = Address::from_bytes([9u8; 32]);
        assert!(matches!(
            registry.reveal_key(&record.id, &stranger).await,
            Err(AegixError::NotOwner)
        ));

        let new_key = registry.regenerate_key(&record.id, &owner()).await.unwrap();
        assert_ne!(new_key, raw_key);
        assert!(registry.authenticate(&raw_key, NOW).is_err());
        assert!(registry.authenticate(&new_key, NOW).is_ok());
    }

    #[tokio::test]
    async fn spend_debits_compose_caps_and_allow_list() {
        let registry = registry("spend");
        let mut lim = limits();
        let allowed = Address::from_bytes([7u8; 32]);
        lim.allowed_resources = vec![allowed.to_b58()];
        let (record, _) = registry
            .register(owner(), "bot".into(), lim, NOW)
            .await
            .unwrap();

        let blocked = Address::from_bytes([8u8; 32]);
        assert!(matches!(
            registry.debit_spend(&record.id, &blocked, 1, NOW),
            Err(AegixError::RecipientNotAllowed(_))
        ));
        assert!(matches!(
            registry.debit_spend(&record.id, &allowed, 1_000_001, NOW),
            Err(AegixError::PerTransactionCapExceeded { .. })
        ));

        // Three max-size debits exhaust the daily window; nothing leaks
        // between the check and the reservation.
        for _ in 0..3 {
            registry.debit_spend(&record.id, &allowed, 1_000_000, NOW).unwrap();
        }
        assert!(matches!(
            registry.debit_spend(&record.id, &allowed, 1, NOW),
            Err(AegixError::LimitExceeded { remaining_daily: 0 })
        ));

        // A failed payment is credited back.
        registry.credit_spend(&record.id, 1_000_000).unwrap();
        registry.debit_spend(&record.id, &allowed, 1_000_000, NOW).unwrap();

        // Next day the window resets.
        registry
            .debit_spend(&record.id, &allowed, 1_000_000, NOW + DAY_MS)
            .unwrap();
    }

    #[tokio::test]
    async fn linked_count_tracks_pool_links() {
        let registry = registry("links");
        let pool = PoolId([1u8; 16]);
        let (a, _) = registry.register(owner(), "a".into(), limits(), NOW).await.unwrap();
        let (b, _) = registry.register(owner(), "b".into(), limits(), NOW).await.unwrap();
        registry
            .patch(&a.id, &owner(), AgentPatch { pool_link: Some(pool), ..Default::default() })
            .unwrap();
        assert_eq!(registry.count_linked(&pool), 1);
        registry
            .patch(&b.id, &owner(), AgentPatch { pool_link: Some(pool), ..Default::default() })
            .unwrap();
        assert_eq!(registry.count_linked(&pool), 2);
        registry.delete(&a.id, &owner()).unwrap();
        assert_eq!(registry.count_linked(&pool), 1);
    }
}
