use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aegix_core::agent::AgentRecord;
use aegix_core::audit::AuditEntry;
use aegix_core::constants::STORE_VERSION;
use aegix_core::error::AegixError;
use aegix_core::payment::PaymentSession;
use aegix_core::pool::Pool;
use aegix_core::session::SessionKey;
use aegix_core::types::{Address, AgentId, PoolId, SessionId};

/// Durable gateway store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   pools           — PoolId bytes         → bincode(Pool)
///   sessions        — session pubkey bytes → bincode(SessionKey)
///   agents          — AgentId bytes        → bincode(AgentRecord)
///   payments        — SessionId bytes      → bincode(PaymentSession)
///   audit           — owner ‖ u64 be seq   → bincode(AuditEntry)
///   recovery_keys   — owner bytes          → 64-byte secret
///   sealed_cells    — handle bytes         → opaque ciphertext record
///   sealed_bindings — owner ‖ key utf8     → handle bytes
///   meta            — utf8 key bytes       → raw bytes (collection version tags)
///
/// Recovery-pool addresses are additionally mirrored into an independent
/// JSON file (see [`GatewayStore::save_recovery_mirror`]) so they survive
/// even when the pool registry itself is empty.
pub struct GatewayStore {
    _db: sled::Db,
    pools: sled::Tree,
    sessions: sled::Tree,
    agents: sled::Tree,
    payments: sled::Tree,
    audit: sled::Tree,
    recovery_keys: sled::Tree,
    sealed_cells: sled::Tree,
    sealed_bindings: sled::Tree,
    meta: sled::Tree,
    mirror_path: PathBuf,
}

fn storage_err(e: impl std::fmt::Display) -> AegixError {
    AegixError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> AegixError {
    AegixError::Serialization(e.to_string())
}

impl GatewayStore {
    /// Open or create the store at `path`, stamping each collection's
    /// version tag on first open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AegixError> {
        let root = path.as_ref().to_path_buf();
        let db = sled::open(root.join("db")).map_err(storage_err)?;
        let pools    = db.open_tree("pools").map_err(storage_err)?;
        let sessions = db.open_tree("sessions").map_err(storage_err)?;
        let agents   = db.open_tree("agents").map_err(storage_err)?;
        let payments = db.open_tree("payments").map_err(storage_err)?;
        let audit    = db.open_tree("audit").map_err(storage_err)?;
        let recovery_keys = db.open_tree("recovery_keys").map_err(storage_err)?;
        let sealed_cells    = db.open_tree("sealed_cells").map_err(storage_err)?;
        let sealed_bindings = db.open_tree("sealed_bindings").map_err(storage_err)?;
        let meta     = db.open_tree("meta").map_err(storage_err)?;

        for collection in ["pools", "sessions", "audit"] {
            let key = format!("version:{collection}");
            if meta.get(key.as_bytes()).map_err(storage_err)?.is_none() {
                meta.insert(key.as_bytes(), &STORE_VERSION.to_be_bytes())
                    .map_err(storage_err)?;
            }
        }

        Ok(Self {
            _db: db,
            pools,
            sessions,
            agents,
            payments,
            audit,
            recovery_keys,
            sealed_cells,
            sealed_bindings,
            meta,
            mirror_path: root.join("recovery_pools.json"),
        })
    }

    pub fn collection_version(&self, collection: &str) -> Result<u32, AegixError> {
        let key = format!("version:{collection}");
        match self.meta.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) if bytes.len() == 4 => {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(&bytes);
                Ok(u32::from_be_bytes(arr))
            }
            _ => Ok(0),
        }
    }

    // ── Pools ────────────────────────────────────────────────────────────────

    pub fn get_pool(&self, id: &PoolId) -> Result<Option<Pool>, AegixError> {
        match self.pools.get(id.0).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_pool(&self, pool: &Pool) -> Result<(), AegixError> {
        let bytes = bincode::serialize(pool).map_err(ser_err)?;
        self.pools.insert(pool.id.0, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_pool(&self, id: &PoolId) -> Result<(), AegixError> {
        self.pools.remove(id.0).map_err(storage_err)?;
        Ok(())
    }

    /// Every pool owned by `owner`, in tree order.
    pub fn iter_pools_for_owner(&self, owner: &Address) -> Result<Vec<Pool>, AegixError> {
        Ok(self
            .iter_all_pools()?
            .into_iter()
            .filter(|p| p.owner == *owner)
            .collect())
    }

    pub fn iter_all_pools(&self) -> Result<Vec<Pool>, AegixError> {
        let mut result = Vec::new();
        for item in self.pools.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(result)
    }

    pub fn count_pools(&self) -> u64 {
        self.pools.len() as u64
    }

    // ── Session keys ─────────────────────────────────────────────────────────

    pub fn get_session(&self, public_key: &Address) -> Result<Option<SessionKey>, AegixError> {
        match self.sessions.get(public_key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_session(&self, session: &SessionKey) -> Result<(), AegixError> {
        let bytes = bincode::serialize(session).map_err(ser_err)?;
        self.sessions
            .insert(session.public_key.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_sessions_for_owner(&self, owner: &Address) -> Result<Vec<SessionKey>, AegixError> {
        Ok(self
            .iter_all_sessions()?
            .into_iter()
            .filter(|s| s.owner == *owner)
            .collect())
    }

    pub fn iter_all_sessions(&self) -> Result<Vec<SessionKey>, AegixError> {
        let mut result = Vec::new();
        for item in self.sessions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(result)
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn get_agent(&self, id: &AgentId) -> Result<Option<AgentRecord>, AegixError> {
        match self.agents.get(id.0).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_agent(&self, agent: &AgentRecord) -> Result<(), AegixError> {
        let bytes = bincode::serialize(agent).map_err(ser_err)?;
        self.agents.insert(agent.id.0, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_agent(&self, id: &AgentId) -> Result<(), AegixError> {
        self.agents.remove(id.0).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_agents(&self) -> Result<Vec<AgentRecord>, AegixError> {
        let mut result = Vec::new();
        for item in self.agents.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(result)
    }

    pub fn iter_agents_for_owner(&self, owner: &Address) -> Result<Vec<AgentRecord>, AegixError> {
        Ok(self
            .iter_agents()?
            .into_iter()
            .filter(|a| a.owner == *owner)
            .collect())
    }

    // ── Payment sessions ─────────────────────────────────────────────────────

    pub fn get_payment(&self, id: &SessionId) -> Result<Option<PaymentSession>, AegixError> {
        match self.payments.get(id.0).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_payment(&self, session: &PaymentSession) -> Result<(), AegixError> {
        let bytes = bincode::serialize(session).map_err(ser_err)?;
        self.payments
            .insert(session.session_id.0, bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Audit ledger ─────────────────────────────────────────────────────────

    /// Append one entry to the owner's ledger. Keys are `owner ‖ seq` so a
    /// prefix scan returns one owner's entries in append order.
    pub fn append_audit(&self, owner: &Address, entry: &AuditEntry) -> Result<u64, AegixError> {
        let seq = self
            .audit
            .scan_prefix(owner.as_bytes())
            .keys()
            .count() as u64;
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(owner.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        let bytes = bincode::serialize(entry).map_err(ser_err)?;
        self.audit.insert(key, bytes).map_err(storage_err)?;
        Ok(seq)
    }

    pub fn iter_audit_for_owner(&self, owner: &Address) -> Result<Vec<AuditEntry>, AegixError> {
        let mut result = Vec::new();
        for item in self.audit.scan_prefix(owner.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(result)
    }

    // ── Recovery-pool keys ───────────────────────────────────────────────────

    /// The gateway custodies its own recovery-pool keypairs (operational hot
    /// keys, not owner funds). Stored per owner.
    pub fn get_recovery_key(&self, owner: &Address) -> Result<Option<[u8; 64]>, AegixError> {
        match self.recovery_keys.get(owner.as_bytes()).map_err(storage_err)? {
            Some(bytes) if bytes.len() == 64 => {
                let mut arr = [0u8; 64];
                arr.copy_from_slice(&bytes);
                Ok(Some(arr))
            }
            Some(_) => Err(AegixError::Storage("corrupt recovery key".to_string())),
            None => Ok(None),
        }
    }

    pub fn put_recovery_key(&self, owner: &Address, secret: &[u8; 64]) -> Result<(), AegixError> {
        self.recovery_keys
            .insert(owner.as_bytes(), secret.as_ref())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_recovery_key_owners(&self) -> Result<Vec<Address>, AegixError> {
        let mut owners = Vec::new();
        for item in self.recovery_keys.iter() {
            let (key, _) = item.map_err(storage_err)?;
            if key.len() == 32 {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&key);
                owners.push(Address::from_bytes(arr));
            }
        }
        Ok(owners)
    }

    // ── Sealed map ───────────────────────────────────────────────────────────
    // The ciphertext records are opaque here; the sealed provider owns the
    // cryptography and this store only gives its cells and bindings the
    // same crash consistency as every other collection.

    pub fn put_sealed_cell(&self, handle: &[u8; 32], bytes: &[u8]) -> Result<(), AegixError> {
        self.sealed_cells
            .insert(handle.as_ref(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_sealed_cell(&self, handle: &[u8; 32]) -> Result<Option<Vec<u8>>, AegixError> {
        Ok(self
            .sealed_cells
            .get(handle.as_ref())
            .map_err(storage_err)?
            .map(|bytes| bytes.to_vec()))
    }

    fn sealed_binding_key(owner: &Address, key: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(32 + key.len());
        k.extend_from_slice(owner.as_bytes());
        k.extend_from_slice(key.as_bytes());
        k
    }

    pub fn put_sealed_binding(
        &self,
        owner: &Address,
        key: &str,
        handle: &[u8; 32],
    ) -> Result<(), AegixError> {
        self.sealed_bindings
            .insert(Self::sealed_binding_key(owner, key), handle.as_ref())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_sealed_binding(
        &self,
        owner: &Address,
        key: &str,
    ) -> Result<Option<[u8; 32]>, AegixError> {
        match self
            .sealed_bindings
            .get(Self::sealed_binding_key(owner, key))
            .map_err(storage_err)?
        {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Some(arr))
            }
            Some(_) => Err(AegixError::Storage("corrupt sealed binding".to_string())),
            None => Ok(None),
        }
    }

    pub fn remove_sealed_binding(&self, owner: &Address, key: &str) -> Result<(), AegixError> {
        self.sealed_bindings
            .remove(Self::sealed_binding_key(owner, key))
            .map_err(storage_err)?;
        Ok(())
    }

    /// This owner's sealed keys under `prefix`, sorted.
    pub fn list_sealed_bindings(
        &self,
        owner: &Address,
        prefix: &str,
    ) -> Result<Vec<String>, AegixError> {
        let mut keys = Vec::new();
        for item in self.sealed_bindings.scan_prefix(owner.as_bytes()) {
            let (k, _) = item.map_err(storage_err)?;
            let key = String::from_utf8_lossy(&k[32..]).into_owned();
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    // ── Recovery-pool mirror ─────────────────────────────────────────────────

    /// Write the `owner → recovery pool address` map to the mirror file via
    /// temp file + atomic rename. The mirror survives a wiped registry.
    pub fn save_recovery_mirror(
        &self,
        mirror: &BTreeMap<String, String>,
    ) -> Result<(), AegixError> {
        let json = serde_json::to_string_pretty(mirror).map_err(ser_err)?;
        let tmp = self.mirror_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(storage_err)?;
        std::fs::rename(&tmp, &self.mirror_path).map_err(storage_err)?;
        Ok(())
    }

    pub fn load_recovery_mirror(&self) -> Result<BTreeMap<String, String>, AegixError> {
        if !self.mirror_path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = std::fs::read_to_string(&self.mirror_path).map_err(storage_err)?;
        serde_json::from_str(&json).map_err(ser_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_core::payment::LegKind;
    use aegix_core::pool::{EncryptedSecret, PoolType};

    fn temp_store(name: &str) -> GatewayStore {
        let dir = std::env::temp_dir().join(format!("aegix_store_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create temp dir");
        GatewayStore::open(&dir).expect("open temp store")
    }

    fn pool(owner_byte: u8, pk_byte: u8) -> Pool {
        Pool::new(
            Address::from_bytes([pk_byte; 32]),
            Address::from_bytes([owner_byte; 32]),
            PoolType::Legacy,
            EncryptedSecret {
                ciphertext: vec![1, 2, 3],
                iv: [0u8; 16],
                salt: [0u8; 16],
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn pool_round_trip_and_owner_filter() {
        let store = temp_store("pools");
        let a = pool(1, 10);
        let b = pool(2, 20);
        store.put_pool(&a).unwrap();
        store.put_pool(&b).unwrap();

        let got = store.get_pool(&a.id).unwrap().unwrap();
        assert_eq!(got.public_key, a.public_key);

        let owned = store
            .iter_pools_for_owner(&Address::from_bytes([1u8; 32]))
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, a.id);
    }

    #[test]
    fn audit_appends_in_order_per_owner() {
        let store = temp_store("audit");
        let owner = Address::from_bytes([5u8; 32]);
        for i in 0..3u64 {
            let entry = AuditEntry {
                session_id: SessionId([i as u8; 16]),
                leg_kind: LegKind::Payment,
                chain_signature: None,
                amount: Some(i),
                timestamp: i as i64,
                privacy: Default::default(),
                failure: None,
            };
            let seq = store.append_audit(&owner, &entry).unwrap();
            assert_eq!(seq, i);
        }
        let entries = store.iter_audit_for_owner(&owner).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].amount, Some(2));

        // Another owner's ledger is untouched.
        let other = Address::from_bytes([6u8; 32]);
        assert!(store.iter_audit_for_owner(&other).unwrap().is_empty());
    }

    #[test]
    fn recovery_mirror_survives_reopen() {
        let dir = std::env::temp_dir().join("aegix_store_test_mirror");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        {
            let store = GatewayStore::open(&dir).unwrap();
            let mut mirror = BTreeMap::new();
            mirror.insert("owner1".to_string(), "recovery1".to_string());
            store.save_recovery_mirror(&mirror).unwrap();
        }
        let store = GatewayStore::open(&dir).unwrap();
        let mirror = store.load_recovery_mirror().unwrap();
        assert_eq!(mirror.get("owner1").map(String::as_str), Some("recovery1"));
    }

    #[test]
    fn collection_versions_are_stamped() {
        let store = temp_store("versions");
        assert_eq!(store.collection_version("pools").unwrap(), STORE_VERSION);
        assert_eq!(store.collection_version("sessions").unwrap(), STORE_VERSION);
        assert_eq!(store.collection_version("audit").unwrap(), STORE_VERSION);
    }
}
