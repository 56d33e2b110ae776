//! aegix-sealed
//!
//! The sealed-container capability: an opaque encrypted key-value store that
//! maps `owner ↔ pool` and `owner ↔ burner` bindings and the audit ledger so
//! that only the owner's decryption capability can enumerate them.
//!
//! The production provider is an external FHE service; this crate models it
//! as the [`SealedStore`] trait plus two symmetric implementations keyed per
//! owner: [`SledSealed`], which persists cells and bindings through the
//! gateway store like every other collection, and [`MemorySealed`], the
//! in-process double the test suites substitute. Callers treat `store` as
//! idempotent and tolerate duplicate writes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use aegix_core::error::AegixError;
use aegix_core::types::Address;
use aegix_store::GatewayStore;

// ── Handle ───────────────────────────────────────────────────────────────────

/// Opaque reference to one sealed value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub [u8; 32]);

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", &hex::encode(self.0)[..8])
    }
}

// ── SealedStore ──────────────────────────────────────────────────────────────

/// The sealed-container capability consumed by the gateway.
///
/// `encrypt`/`decrypt` are the two pure operations; `store`/`retrieve`/
/// `list_keys` are the storage side-channel. Decryption under the wrong
/// owner fails — the owner argument IS the capability.
#[async_trait]
pub trait SealedStore: Send + Sync {
    async fn encrypt(&self, owner: &Address, plaintext: &[u8]) -> Result<Handle, AegixError>;

    async fn decrypt(&self, owner: &Address, handle: &Handle) -> Result<Vec<u8>, AegixError>;

    /// Idempotent: re-storing a key replaces the binding.
    async fn store(&self, owner: &Address, key: &str, handle: &Handle) -> Result<(), AegixError>;

    async fn retrieve(&self, owner: &Address, key: &str) -> Result<Option<Handle>, AegixError>;

    /// Drop a binding. Removing an absent key is a no-op.
    async fn remove(&self, owner: &Address, key: &str) -> Result<(), AegixError>;

    /// Enumerate this owner's keys under `prefix`, sorted.
    async fn list_keys(&self, owner: &Address, prefix: &str) -> Result<Vec<String>, AegixError>;

    /// Seal and bind in one step.
    async fn put(&self, owner: &Address, key: &str, plaintext: &[u8]) -> Result<(), AegixError> {
        let handle = self.encrypt(owner, plaintext).await?;
        self.store(owner, key, &handle).await
    }

    /// Look up and open in one step.
    async fn get(&self, owner: &Address, key: &str) -> Result<Option<Vec<u8>>, AegixError> {
        match self.retrieve(owner, key).await? {
            Some(handle) => Ok(Some(self.decrypt(owner, &handle).await?)),
            None => Ok(None),
        }
    }
}

// ── Shared cell cryptography ─────────────────────────────────────────────────

/// One sealed value at rest. Opaque to the store that persists it.
#[derive(Serialize, Deserialize)]
struct CellRecord {
    owner_tag: [u8; 32],
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

fn owner_cipher_key(master: &[u8; 32], owner: &Address) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(master);
    h.update(owner.as_bytes());
    *h.finalize().as_bytes()
}

fn owner_tag(owner: &Address) -> [u8; 32] {
    *blake3::hash(owner.as_bytes()).as_bytes()
}

fn seal_cell(
    master: &[u8; 32],
    owner: &Address,
    plaintext: &[u8],
) -> Result<(Handle, CellRecord), AegixError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&owner_cipher_key(master, owner)));
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| AegixError::Sealed(e.to_string()))?;

    let mut id = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut id);
    Ok((
        Handle(id),
        CellRecord {
            owner_tag: owner_tag(owner),
            nonce,
            ciphertext,
        },
    ))
}

fn open_cell(master: &[u8; 32], owner: &Address, cell: &CellRecord) -> Result<Vec<u8>, AegixError> {
    if cell.owner_tag != owner_tag(owner) {
        return Err(AegixError::Sealed("handle not owned by caller".to_string()));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&owner_cipher_key(master, owner)));
    cipher
        .decrypt(Nonce::from_slice(&cell.nonce), cell.ciphertext.as_ref())
        .map_err(|e| AegixError::Sealed(e.to_string()))
}

// ── SledSealed ───────────────────────────────────────────────────────────────

/// The gateway's provider: cells and bindings live in dedicated trees of
/// the gateway store, so owner bindings (pool enumeration, agent-key
/// reveal, audit mirrors) survive restarts like every other collection.
pub struct SledSealed {
    master: [u8; 32],
    store: Arc<GatewayStore>,
}

impl SledSealed {
    /// Open against the gateway store. The master key persists beside the
    /// store (the gateway binary owns that file).
    pub fn open(store: Arc<GatewayStore>, master: [u8; 32]) -> Self {
        Self { master, store }
    }
}

#[async_trait]
impl SealedStore for SledSealed {
    async fn encrypt(&self, owner: &Address, plaintext: &[u8]) -> Result<Handle, AegixError> {
        let (handle, cell) = seal_cell(&self.master, owner, plaintext)?;
        let bytes =
            bincode::serialize(&cell).map_err(|e| AegixError::Serialization(e.to_string()))?;
        self.store.put_sealed_cell(&handle.0, &bytes)?;
        Ok(handle)
    }

    async fn decrypt(&self, owner: &Address, handle: &Handle) -> Result<Vec<u8>, AegixError> {
        let bytes = self
            .store
            .get_sealed_cell(&handle.0)?
            .ok_or_else(|| AegixError::Sealed("unknown handle".to_string()))?;
        let cell: CellRecord =
            bincode::deserialize(&bytes).map_err(|e| AegixError::Serialization(e.to_string()))?;
        open_cell(&self.master, owner, &cell)
    }

    async fn store(&self, owner: &Address, key: &str, handle: &Handle) -> Result<(), AegixError> {
        self.store.put_sealed_binding(owner, key, &handle.0)
    }

    async fn retrieve(&self, owner: &Address, key: &str) -> Result<Option<Handle>, AegixError> {
        Ok(self.store.get_sealed_binding(owner, key)?.map(Handle))
    }

    async fn remove(&self, owner: &Address, key: &str) -> Result<(), AegixError> {
        self.store.remove_sealed_binding(owner, key)
    }

    async fn list_keys(&self, owner: &Address, prefix: &str) -> Result<Vec<String>, AegixError> {
        self.store.list_sealed_bindings(owner, prefix)
    }
}

// ── MemorySealed ─────────────────────────────────────────────────────────────

/// In-process [`SealedStore`] double for tests. Same cryptography as
/// [`SledSealed`], no persistence.
pub struct MemorySealed {
    master: [u8; 32],
    cells: Mutex<HashMap<Handle, CellRecord>>,
    bindings: Mutex<HashMap<(Address, String), Handle>>,
}

impl MemorySealed {
    pub fn new() -> Self {
        let mut master = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut master);
        Self::with_master(master)
    }

    pub fn with_master(master: [u8; 32]) -> Self {
        Self {
            master,
            cells: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySealed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SealedStore for MemorySealed {
    async fn encrypt(&self, owner: &Address, plaintext: &[u8]) -> Result<Handle, AegixError> {
        let (handle, cell) = seal_cell(&self.master, owner, plaintext)?;
        self.cells.lock().expect("sealed cells lock").insert(handle, cell);
        Ok(handle)
    }

    async fn decrypt(&self, owner: &Address, handle: &Handle) -> Result<Vec<u8>, AegixError> {
        let cells = self.cells.lock().expect("sealed cells lock");
        let cell = cells
            .get(handle)
            .ok_or_else(|| AegixError::Sealed("unknown handle".to_string()))?;
        open_cell(&self.master, owner, cell)
    }

    async fn store(&self, owner: &Address, key: &str, handle: &Handle) -> Result<(), AegixError> {
        self.bindings
            .lock()
            .expect("sealed bindings lock")
            .insert((*owner, key.to_string()), *handle);
        Ok(())
    }

    async fn retrieve(&self, owner: &Address, key: &str) -> Result<Option<Handle>, AegixError> {
        Ok(self
            .bindings
            .lock()
            .expect("sealed bindings lock")
            .get(&(*owner, key.to_string()))
            .copied())
    }

    async fn remove(&self, owner: &Address, key: &str) -> Result<(), AegixError> {
        self.bindings
            .lock()
            .expect("sealed bindings lock")
            .remove(&(*owner, key.to_string()));
        Ok(())
    }

    async fn list_keys(&self, owner: &Address, prefix: &str) -> Result<Vec<String>, AegixError> {
        let bindings = self.bindings.lock().expect("sealed bindings lock");
        let mut keys: Vec<String> = bindings
            .keys()
            .filter(|(o, k)| o == owner && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(b: u8) -> Address {
        Address::from_bytes([b; 32])
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let sealed = MemorySealed::new();
        sealed.put(&owner(1), "pool:abc", b"metadata").await.unwrap();
        let got = sealed.get(&owner(1), "pool:abc").await.unwrap();
        assert_eq!(got.as_deref(), Some(b"metadata".as_ref()));
    }

    #[tokio::test]
    async fn wrong_owner_cannot_open_a_handle() {
        let sealed = MemorySealed::new();
        let handle = sealed.encrypt(&owner(1), b"secret").await.unwrap();
        assert!(sealed.decrypt(&owner(2), &handle).await.is_err());
    }

    #[tokio::test]
    async fn listing_is_owner_scoped_and_prefix_filtered() {
        let sealed = MemorySealed::new();
        sealed.put(&owner(1), "pool:a", b"1").await.unwrap();
        sealed.put(&owner(1), "pool:b", b"2").await.unwrap();
        sealed.put(&owner(1), "burner:x", b"3").await.unwrap();
        sealed.put(&owner(2), "pool:c", b"4").await.unwrap();

        let keys = sealed.list_keys(&owner(1), "pool:").await.unwrap();
        assert_eq!(keys, vec!["pool:a".to_string(), "pool:b".to_string()]);
    }

    #[tokio::test]
    async fn store_is_idempotent_replace() {
        let sealed = MemorySealed::new();
        sealed.put(&owner(1), "k", b"v1").await.unwrap();
        sealed.put(&owner(1), "k", b"v2").await.unwrap();
        let got = sealed.get(&owner(1), "k").await.unwrap();
        assert_eq!(got.as_deref(), Some(b"v2".as_ref()));
    }

    #[tokio::test]
    async fn sled_provider_survives_reopen_under_the_same_master() {
        let dir = std::env::temp_dir().join("aegix_sealed_test_reopen");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let master = [7u8; 32];

        {
            let store = Arc::new(GatewayStore::open(&dir).unwrap());
            let sealed = SledSealed::open(store, master);
            sealed
                .put(&owner(1), "agent-key:abc", b"aegix_rawkey")
                .await
                .unwrap();
        }

        let store = Arc::new(GatewayStore::open(&dir).unwrap());
        let sealed = SledSealed::open(store, master);
        let got = sealed.get(&owner(1), "agent-key:abc").await.unwrap();
        assert_eq!(got.as_deref(), Some(b"aegix_rawkey".as_ref()));
        assert_eq!(
            sealed.list_keys(&owner(1), "agent-key:").await.unwrap(),
            vec!["agent-key:abc".to_string()]
        );

        // Removal persists too.
        sealed.remove(&owner(1), "agent-key:abc").await.unwrap();
        assert!(sealed.get(&owner(1), "agent-key:abc").await.unwrap().is_none());
    }
}
