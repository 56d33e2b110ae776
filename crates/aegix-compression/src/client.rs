//! The compression capability layer.
//!
//! Wraps the provider RPC with the operations the payment engine needs:
//! balance reads, compress/decompress transaction construction, and
//! compressed-transfer building with validity proofs. A startup probe
//! demotes the client to `NoCompression` when the endpoint lacks the
//! compression method family, so callers see `UnsupportedEnvironment`
//! instead of a misleading low-level error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use aegix_core::constants::{HEALTH_CACHE_SECS, ZK_COMPUTE_UNIT_LIMIT};
use aegix_core::error::AegixError;
use aegix_core::types::{Address, MicroUnits};
use aegix_chain::rpc::ChainRpc;
use aegix_chain::tx::{token_account_address, Instruction, PreparedTransaction};
use aegix_crypto::keypair::KeyPair;

use crate::provider::{CompressedAccount, CompressionRpc, ValidityProof};

// ── Capability / health ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Full,
    NoCompression,
}

/// Snapshot returned by [`CompressionClient::health`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Health {
    pub healthy: bool,
    pub supports_compression: bool,
    pub rpc_summary: String,
}

/// Sentinel queried by the capability probe. Any fixed address works; the
/// probe only cares whether the method resolves.
fn sentinel_address() -> Address {
    Address::from_bytes([1u8; 32])
}

// ── Wire payloads for provider-built instructions ────────────────────────────

#[derive(Serialize, Deserialize)]
struct CompressedTransferData {
    proof: Vec<u8>,
    root_indices: Vec<u16>,
    amount: MicroUnits,
    owner: Address,
    recipient: Address,
    mint: Address,
}

#[derive(Serialize, Deserialize)]
struct CompressData {
    amount: MicroUnits,
    owner: Address,
    mint: Address,
}

#[derive(Serialize, Deserialize)]
struct DecompressData {
    proof: Vec<u8>,
    root_indices: Vec<u16>,
    amount: MicroUnits,
    owner: Address,
    destination: Address,
    mint: Address,
}

// ── CompressionClient ────────────────────────────────────────────────────────

pub struct CompressionClient {
    provider: Arc<dyn CompressionRpc>,
    chain: Arc<dyn ChainRpc>,
    capability: Mutex<Option<Capability>>,
    health_cache: Mutex<Option<(Instant, Health)>>,
}

impl CompressionClient {
    pub fn new(provider: Arc<dyn CompressionRpc>, chain: Arc<dyn ChainRpc>) -> Self {
        Self {
            provider,
            chain,
            capability: Mutex::new(None),
            health_cache: Mutex::new(None),
        }
    }

    /// Probe the endpoint once and cache the verdict for the process
    /// lifetime. A "method not found" class response demotes to
    /// `NoCompression`.
    pub async fn probe(&self) -> Capability {
        let mut cap = self.capability.lock().await;
        if let Some(c) = *cap {
            return c;
        }
        let verdict = match self
            .provider
            .compressed_token_accounts_by_owner(&sentinel_address(), &sentinel_address())
            .await
        {
            Ok(_) => Capability::Full,
            Err(AegixError::CompressionUnsupported) => {
                warn!("endpoint lacks compression methods; demoting to NoCompression");
                Capability::NoCompression
            }
            // Transport hiccups are not capability evidence; stay optimistic
            // and let the next probe retry.
            Err(e) => {
                warn!(error = %e, "capability probe inconclusive");
                return Capability::Full;
            }
        };
        *cap = Some(verdict);
        info!(?verdict, "compression capability probed");
        verdict
    }

    async fn ensure_supported(&self) -> Result<(), AegixError> {
        match self.probe().await {
            Capability::Full => Ok(()),
            Capability::NoCompression => Err(AegixError::CompressionUnsupported),
        }
    }

    /// Health snapshot, cached for [`HEALTH_CACHE_SECS`].
    pub async fn health(&self) -> Health {
        {
            let cache = self.health_cache.lock().await;
            if let Some((at, health)) = cache.as_ref() {
                if at.elapsed() < Duration::from_secs(HEALTH_CACHE_SECS) {
                    return health.clone();
                }
            }
        }

        let capability = self.probe().await;
        let chain_ok = self.chain.latest_blockhash().await.is_ok();
        let health = Health {
            healthy: chain_ok,
            supports_compression: capability == Capability::Full,
            rpc_summary: format!(
                "chain={} compression={}",
                if chain_ok { "ok" } else { "unreachable" },
                if capability == Capability::Full { "ok" } else { "absent" },
            ),
        };
        *self.health_cache.lock().await = Some((Instant::now(), health.clone()));
        health
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Total compressed balance for `(owner, mint)`.
    pub async fn compressed_balance(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> Result<MicroUnits, AegixError> {
        self.ensure_supported().await?;
        let accounts = self
            .provider
            .compressed_token_accounts_by_owner(owner, mint)
            .await?;
        Ok(accounts.iter().map(|a| a.amount).sum())
    }

    /// Select a minimal set of compressed accounts covering `amount`
    /// (largest first) and fetch a validity proof over their hashes.
    async fn select_and_prove(
        &self,
        owner: &Address,
        mint: &Address,
        amount: MicroUnits,
    ) -> Result<(Vec<CompressedAccount>, ValidityProof), AegixError> {
        let mut accounts = self
            .provider
            .compressed_token_accounts_by_owner(owner, mint)
            .await?;
        accounts.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut selected = Vec::new();
        let mut covered: u64 = 0;
        for acc in accounts {
            if covered >= amount {
                break;
            }
            covered = covered.saturating_add(acc.amount);
            selected.push(acc);
        }
        if covered < amount {
            return Err(AegixError::InsufficientPoolFunds {
                need: amount,
                have: covered,
            });
        }

        let hashes: Vec<[u8; 32]> = selected.iter().map(|a| a.hash).collect();
        let proof = self.provider.get_validity_proof(&hashes).await?;
        Ok((selected, proof))
    }

    // ── Transaction builders ─────────────────────────────────────────────────

    async fn anchor(&self, mut tx: PreparedTransaction) -> Result<PreparedTransaction, AegixError> {
        let (hash, height) = self.chain.latest_blockhash().await?;
        tx.set_blockhash(hash, height);
        Ok(tx)
    }

    /// Build an owner-signed transaction moving `amount` of plain asset into
    /// compressed state. Returned unsigned for the owner's wallet.
    pub async fn compress(
        &self,
        owner: &Address,
        amount: MicroUnits,
        mint: &Address,
    ) -> Result<PreparedTransaction, AegixError> {
        self.ensure_supported().await?;
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let tree = self.provider.state_tree_info().await?;
        let pool = self.provider.token_pool_info(mint).await?;

        let data = bincode::serialize(&CompressData {
            amount,
            owner: *owner,
            mint: *mint,
        })
        .map_err(|e| AegixError::Serialization(e.to_string()))?;

        let ix = Instruction::Raw {
            program: pool.program,
            accounts: vec![tree.tree, tree.queue, pool.pool, *owner, *mint],
            signers: vec![*owner],
            data,
        };
        self.anchor(PreparedTransaction::new(
            *owner,
            vec![
                Instruction::ComputeBudgetLimit {
                    units: ZK_COMPUTE_UNIT_LIMIT,
                },
                ix,
            ],
        ))
        .await
    }

    /// Build a decompress of `amount` into `owner`'s token account, fees
    /// paid by `fee_payer`. The token owner authorizes the compressed-token
    /// spend, so both must sign.
    pub async fn decompress(
        &self,
        owner: &Address,
        amount: MicroUnits,
        mint: &Address,
        fee_payer: &Address,
    ) -> Result<PreparedTransaction, AegixError> {
        self.ensure_supported().await?;
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let (_, proof) = self.select_and_prove(owner, mint, amount).await?;
        let tree = self.provider.state_tree_info().await?;
        let pool = self.provider.token_pool_info(mint).await?;
        let destination = token_account_address(owner, mint);

        let data = bincode::serialize(&DecompressData {
            proof: proof.proof,
            root_indices: proof.root_indices,
            amount,
            owner: *owner,
            destination,
            mint: *mint,
        })
        .map_err(|e| AegixError::Serialization(e.to_string()))?;

        let ix = Instruction::Raw {
            program: pool.program,
            accounts: vec![tree.tree, tree.queue, pool.pool, *owner, destination, *mint],
            signers: vec![*owner],
            data,
        };
        self.anchor(PreparedTransaction::new(
            *fee_payer,
            vec![
                Instruction::ComputeBudgetLimit {
                    units: ZK_COMPUTE_UNIT_LIMIT,
                },
                ix,
            ],
        ))
        .await
    }

    /// Compressed transfer signed by the owner alone (owner pays fees).
    pub async fn build_compressed_transfer(
        &self,
        owner_kp: &KeyPair,
        recipient: &Address,
        amount: MicroUnits,
        mint: &Address,
    ) -> Result<PreparedTransaction, AegixError> {
        let mut tx = self
            .compressed_transfer_tx(&owner_kp.address, &owner_kp.address, recipient, amount, mint)
            .await?;
        tx.partial_sign(owner_kp)?;
        Ok(tx)
    }

    /// Compressed transfer with a distinct fee payer; both keypairs sign and
    /// the transfer instruction declares the token owner explicitly.
    pub async fn build_compressed_transfer_with_fee_payer(
        &self,
        owner_kp: &KeyPair,
        fee_payer_kp: &KeyPair,
        recipient: &Address,
        amount: MicroUnits,
        mint: &Address,
    ) -> Result<PreparedTransaction, AegixError> {
        let mut tx = self
            .compressed_transfer_tx(&owner_kp.address, &fee_payer_kp.address, recipient, amount, mint)
            .await?;
        tx.partial_sign(owner_kp)?;
        tx.partial_sign(fee_payer_kp)?;
        Ok(tx)
    }

    /// Shared construction: compute-budget request first, transfer second.
    async fn compressed_transfer_tx(
        &self,
        owner: &Address,
        fee_payer: &Address,
        recipient: &Address,
        amount: MicroUnits,
        mint: &Address,
    ) -> Result<PreparedTransaction, AegixError> {
        self.ensure_supported().await?;
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let (_, proof) = self.select_and_prove(owner, mint, amount).await?;
        let tree = self.provider.state_tree_info().await?;
        let pool = self.provider.token_pool_info(mint).await?;

        let data = bincode::serialize(&CompressedTransferData {
            proof: proof.proof,
            root_indices: proof.root_indices,
            amount,
            owner: *owner,
            recipient: *recipient,
            mint: *mint,
        })
        .map_err(|e| AegixError::Serialization(e.to_string()))?;

        let mut signers = vec![*owner];
        if fee_payer != owner {
            signers.push(*fee_payer);
        }
        let ix = Instruction::Raw {
            program: pool.program,
            accounts: vec![tree.tree, tree.queue, pool.pool, *owner, *recipient, *mint],
            signers,
            data,
        };
        self.anchor(PreparedTransaction::new(
            *fee_payer,
            vec![
                Instruction::ComputeBudgetLimit {
                    units: ZK_COMPUTE_UNIT_LIMIT,
                },
                ix,
            ],
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use aegix_core::types::{ChainSignature, Lamports};
    use aegix_chain::tx::Blockhash;
    use crate::provider::{StateTreeInfo, TokenPoolInfo};

    struct MockProvider {
        accounts: Vec<CompressedAccount>,
        unsupported: AtomicBool,
    }

    impl MockProvider {
        fn with_amounts(owner: Address, mint: Address, amounts: &[u64]) -> Self {
            let accounts = amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| CompressedAccount {
                    hash: [i as u8 + 1; 32],
                    owner,
                    mint,
                    amount: *amount,
                })
                .collect();
            Self {
                accounts,
                unsupported: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CompressionRpc for MockProvider {
        async fn compressed_token_accounts_by_owner(
            &self,
            owner: &Address,
            mint: &Address,
        ) -> Result<Vec<CompressedAccount>, AegixError> {
            if self.unsupported.load(Ordering::SeqCst) {
                return Err(AegixError::CompressionUnsupported);
            }
            Ok(self
                .accounts
                .iter()
                .filter(|a| a.owner == *owner && a.mint == *mint)
                .cloned()
                .collect())
        }

        async fn get_validity_proof(
            &self,
            hashes: &[[u8; 32]],
        ) -> Result<ValidityProof, AegixError> {
            Ok(ValidityProof {
                proof: vec![0xAA; 32],
                root_indices: (0..hashes.len() as u16).collect(),
            })
        }

        async fn state_tree_info(&self) -> Result<StateTreeInfo, AegixError> {
            Ok(StateTreeInfo {
                tree: Address::from_bytes([0x11; 32]),
                queue: Address::from_bytes([0x12; 32]),
            })
        }

        async fn token_pool_info(&self, _mint: &Address) -> Result<TokenPoolInfo, AegixError> {
            Ok(TokenPoolInfo {
                program: Address::from_bytes([0x13; 32]),
                pool: Address::from_bytes([0x14; 32]),
            })
        }
    }

    struct MockChain;

    #[async_trait]
    impl ChainRpc for MockChain {
        async fn get_balance(&self, _address: &Address) -> Result<Lamports, AegixError> {
            Ok(0)
        }
        async fn get_token_balance(&self, _ta: &Address) -> Result<MicroUnits, AegixError> {
            Ok(0)
        }
        async fn token_account_exists(
            &self,
            _owner: &Address,
            _mint: &Address,
        ) -> Result<bool, AegixError> {
            Ok(false)
        }
        async fn latest_blockhash(&self) -> Result<(Blockhash, u64), AegixError> {
            Ok((Blockhash([7u8; 32]), 1_000))
        }
        async fn send_transaction(
            &self,
            _tx: &PreparedTransaction,
            _skip_preflight: bool,
        ) -> Result<ChainSignature, AegixError> {
            Ok(ChainSignature("mock".to_string()))
        }
        async fn confirm(
            &self,
            _signature: &ChainSignature,
            _deadline: Duration,
        ) -> Result<(), AegixError> {
            Ok(())
        }
    }

    fn client(provider: MockProvider) -> CompressionClient {
        CompressionClient::new(Arc::new(provider), Arc::new(MockChain))
    }

    #[tokio::test]
    async fn probe_demotes_on_method_not_found() {
        let provider = MockProvider::with_amounts(
            Address::from_bytes([1u8; 32]),
            Address::from_bytes([2u8; 32]),
            &[],
        );
        provider.unsupported.store(true, Ordering::SeqCst);
        let client = client(provider);

        assert_eq!(client.probe().await, Capability::NoCompression);
        let owner = Address::from_bytes([1u8; 32]);
        let mint = Address::from_bytes([2u8; 32]);
        let err = client.compressed_balance(&owner, &mint).await.unwrap_err();
        assert!(matches!(err, AegixError::CompressionUnsupported));
    }

    #[tokio::test]
    async fn compressed_balance_sums_accounts() {
        let owner = Address::from_bytes([1u8; 32]);
        let mint = Address::from_bytes([2u8; 32]);
        let client = client(MockProvider::with_amounts(owner, mint, &[300, 700, 50]));
        assert_eq!(client.compressed_balance(&owner, &mint).await.unwrap(), 1_050);
    }

    #[tokio::test]
    async fn transfer_with_fee_payer_declares_owner_and_signs_both() {
        let owner = KeyPair::generate();
        let fee_payer = KeyPair::generate();
        let mint = Address::from_bytes([2u8; 32]);
        let recipient = Address::from_bytes([3u8; 32]);
        let client = client(MockProvider::with_amounts(owner.address, mint, &[2_000_000]));

        let tx = client
            .build_compressed_transfer_with_fee_payer(&owner, &fee_payer, &recipient, 1_000_000, &mint)
            .await
            .unwrap();

        assert_eq!(tx.fee_payer, fee_payer.address);
        assert!(matches!(
            tx.instructions[0],
            Instruction::ComputeBudgetLimit {
                units: ZK_COMPUTE_UNIT_LIMIT
            }
        ));
        match &tx.instructions[1] {
            Instruction::Raw { signers, .. } => {
                assert!(signers.contains(&owner.address), "token owner declared");
            }
            other => panic!("expected Raw transfer, got {other:?}"),
        }
        assert!(tx.is_fully_signed());
    }

    #[tokio::test]
    async fn insufficient_compressed_funds_is_quantified() {
        let owner = KeyPair::generate();
        let mint = Address::from_bytes([2u8; 32]);
        let recipient = Address::from_bytes([3u8; 32]);
        let client = client(MockProvider::with_amounts(owner.address, mint, &[100, 200]));

        let err = client
            .build_compressed_transfer(&owner, &recipient, 1_000, &mint)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AegixError::InsufficientPoolFunds {
                need: 1_000,
                have: 300
            }
        ));
    }
}

