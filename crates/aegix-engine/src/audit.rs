//! The audit ledger: an append-only per-owner record of every transaction
//! leg, mirrored into the sealed map so entries are enumerable only by the
//! owner holding the decryption capability.

use std::sync::Arc;

use aegix_core::audit::AuditEntry;
use aegix_core::error::AegixError;
use aegix_core::types::Address;
use aegix_sealed::SealedStore;
use aegix_store::GatewayStore;

pub struct AuditLedger {
    store: Arc<GatewayStore>,
    sealed: Arc<dyn SealedStore>,
}

impl AuditLedger {
    pub fn new(store: Arc<GatewayStore>, sealed: Arc<dyn SealedStore>) -> Self {
        Self { store, sealed }
    }

    /// Append one leg record and publish it under the owner's sealed key.
    /// Sealed-map writes are idempotent, so a duplicate publish after a
    /// retried append is harmless.
    pub async fn append(&self, owner: &Address, entry: &AuditEntry) -> Result<u64, AegixError> {
        let seq = self.store.append_audit(owner, entry)?;
        let bytes =
            serde_json::to_vec(entry).map_err(|e| AegixError::Serialization(e.to_string()))?;
        self.sealed
            .put(owner, &format!("audit:{seq:012}"), &bytes)
            .await?;
        Ok(seq)
    }

    pub fn list(&self, owner: &Address) -> Result<Vec<AuditEntry>, AegixError> {
        self.store.iter_audit_for_owner(owner)
    }
}
