//! End-to-end payment-flow tests against in-memory capability doubles:
//! the gasless compressed happy path, the direct fallback, the dust-attack
//! close, and the failure/liquidity semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aegix_agents::AgentPatch;
use aegix_chain::rpc::ChainRpc;
use aegix_chain::tx::{token_account_address, Blockhash, Instruction, PreparedTransaction};
use aegix_compression::{CompressedAccount, CompressionRpc, StateTreeInfo, TokenPoolInfo, ValidityProof};
use aegix_core::agent::SpendingLimits;
use aegix_core::challenge::Challenge;
use aegix_core::constants::DIRECT_BURNER_FUND_LAMPORTS;
use aegix_core::error::AegixError;
use aegix_core::payment::{LegKind, PaymentMode, SessionState};
use aegix_core::session::SessionLimits;
use aegix_core::types::{Address, ChainSignature, Lamports, MicroUnits};
use aegix_crypto::keypair::KeyPair;
use aegix_engine::{
    Core, CoreConfig, Facilitator, PaymentPayload, PaymentRequest, PaymentRequirements,
    SessionAuth, SupportedNetwork,
};
use aegix_sealed::MemorySealed;
use aegix_store::GatewayStore;

const NOW: i64 = 1_700_000_000_000;
const MINT: [u8; 32] = [42u8; 32];
const NETWORK: &str = "solana-devnet";

// ── Mock chain ────────────────────────────────────────────────────────────────

struct MockChain {
    balances: Mutex<HashMap<Address, Lamports>>,
    token_accounts: Mutex<HashMap<Address, bool>>,
    /// Token balance reported for any account during close (dust injection).
    dust_on_close: AtomicU64,
    submitted: Mutex<Vec<(PreparedTransaction, bool)>>,
    sig_counter: AtomicU64,
    /// Executing a compressed-program instruction moves compressed holdings
    /// between owners in the provider double.
    provider: Arc<MockProvider>,
}

impl MockChain {
    fn new(provider: Arc<MockProvider>) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            token_accounts: Mutex::new(HashMap::new()),
            dust_on_close: AtomicU64::new(0),
            submitted: Mutex::new(Vec::new()),
            sig_counter: AtomicU64::new(0),
            provider,
        }
    }

    fn set_balance(&self, address: Address, lamports: Lamports) {
        self.balances.lock().unwrap().insert(address, lamports);
    }

    fn set_token_account(&self, owner: Address, exists: bool) {
        self.token_accounts.lock().unwrap().insert(owner, exists);
    }

    fn submitted(&self) -> Vec<(PreparedTransaction, bool)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_balance(&self, address: &Address) -> Result<Lamports, AegixError> {
        Ok(*self.balances.lock().unwrap().get(address).unwrap_or(&0))
    }

    async fn get_token_balance(&self, _ta: &Address) -> Result<MicroUnits, AegixError> {
        Ok(self.dust_on_close.load(Ordering::SeqCst))
    }

    async fn token_account_exists(
        &self,
        owner: &Address,
        _mint: &Address,
    ) -> Result<bool, AegixError> {
        Ok(*self.token_accounts.lock().unwrap().get(owner).unwrap_or(&false))
    }

    async fn latest_blockhash(&self) -> Result<(Blockhash, u64), AegixError> {
        Ok((Blockhash([7u8; 32]), 1_000))
    }

    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        skip_preflight: bool,
    ) -> Result<ChainSignature, AegixError> {
        if !tx.is_fully_signed() {
            return Err(AegixError::TxRejected("missing signatures".to_string()));
        }
        for ix in &tx.instructions {
            if let Instruction::Raw { program, accounts, .. } = ix {
                if *program == Address::from_bytes([0x23; 32]) && accounts.len() == 6 {
                    self.provider.transfer_all(&accounts[3], &accounts[4]);
                }
            }
        }
        self.submitted.lock().unwrap().push((tx.clone(), skip_preflight));
        let n = self.sig_counter.fetch_add(1, Ordering::SeqCst);
        Ok(ChainSignature(format!("chain-sig-{n}")))
    }

    async fn confirm(&self, _sig: &ChainSignature, _deadline: Duration) -> Result<(), AegixError> {
        Ok(())
    }
}

// ── Mock compression provider ─────────────────────────────────────────────────

struct MockProvider {
    accounts: Mutex<Vec<CompressedAccount>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            accounts: Mutex::new(Vec::new()),
        }
    }

    fn credit(&self, owner: Address, mint: Address, amount: MicroUnits) {
        let mut accounts = self.accounts.lock().unwrap();
        let n = accounts.len() as u8;
        accounts.push(CompressedAccount {
            hash: [n + 1; 32],
            owner,
            mint,
            amount,
        });
    }

    fn transfer_all(&self, from: &Address, to: &Address) {
        let mut accounts = self.accounts.lock().unwrap();
        for account in accounts.iter_mut() {
            if account.owner == *from {
                account.owner = *to;
            }
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
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.owner == *owner && a.mint == *mint)
            .cloned()
            .collect())
    }

    async fn get_validity_proof(&self, hashes: &[[u8; 32]]) -> Result<ValidityProof, AegixError> {
        Ok(ValidityProof {
            proof: vec![0xAB; 64],
            root_indices: (0..hashes.len() as u16).collect(),
        })
    }

    async fn state_tree_info(&self) -> Result<StateTreeInfo, AegixError> {
        Ok(StateTreeInfo {
            tree: Address::from_bytes([0x21; 32]),
            queue: Address::from_bytes([0x22; 32]),
        })
    }

    async fn token_pool_info(&self, _mint: &Address) -> Result<TokenPoolInfo, AegixError> {
        Ok(TokenPoolInfo {
            program: Address::from_bytes([0x23; 32]),
            pool: Address::from_bytes([0x24; 32]),
        })
    }
}

// ── Mock facilitator ──────────────────────────────────────────────────────────

struct MockFacilitator {
    fee_payer: Option<Address>,
    settles: Mutex<Vec<(PaymentPayload, PaymentRequirements)>>,
}

impl MockFacilitator {
    fn healthy(fee_payer: Address) -> Self {
        Self {
            fee_payer: Some(fee_payer),
            settles: Mutex::new(Vec::new()),
        }
    }

    fn down() -> Self {
        Self {
            fee_payer: None,
            settles: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Facilitator for MockFacilitator {
    async fn supported(&self) -> Result<Vec<SupportedNetwork>, AegixError> {
        match self.fee_payer {
            Some(fp) => Ok(vec![SupportedNetwork {
                network: NETWORK.to_string(),
                fee_payer: fp.to_b58(),
            }]),
            None => Err(AegixError::FacilitatorUnavailable("down".to_string())),
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ChainSignature, AegixError> {
        self.settles
            .lock()
            .unwrap()
            .push((payload.clone(), requirements.clone()));
        Ok(ChainSignature("settled-sig".to_string()))
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    core: Core,
    chain: Arc<MockChain>,
    provider: Arc<MockProvider>,
    facilitator: Arc<MockFacilitator>,
    owner: KeyPair,
}

fn harness(name: &str, facilitator: MockFacilitator) -> Harness {
    let dir = std::env::temp_dir().join(format!("aegix_engine_test_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let provider = Arc::new(MockProvider::new());
    let chain = Arc::new(MockChain::new(provider.clone()));
    let facilitator = Arc::new(facilitator);
    let core = Core::init(
        Arc::new(GatewayStore::open(&dir).unwrap()),
        Arc::new(MemorySealed::new()),
        chain.clone(),
        provider.clone(),
        facilitator.clone(),
        CoreConfig {
            network: NETWORK.to_string(),
            mint: Address::from_bytes(MINT),
        },
    )
    .unwrap();

    Harness {
        core,
        chain,
        provider,
        facilitator,
        owner: KeyPair::generate(),
    }
}

impl Harness {
    /// Legacy pool + recovery pool + a granted agent session, the standing
    /// start state for every payment test.
    async fn prepared(&self, compressed_micros: MicroUnits) -> (aegix_core::pool::Pool, SessionAuth) {
        let sig = self.owner.sign(
            Challenge::CreatePool {
                owner: self.owner.address,
                ts: NOW,
            }
            .render()
            .as_bytes(),
        );
        let pool = self
            .core
            .pools
            .get_or_create_legacy(self.owner.address, NOW, &sig, NOW)
            .await
            .unwrap();

        let recovery = self.core.recovery.init(&self.owner.address).unwrap();
        self.chain.set_balance(recovery, 1_000_000_000);

        if compressed_micros > 0 {
            self.provider
                .credit(pool.public_key, Address::from_bytes(MINT), compressed_micros);
        }

        let (record, _raw_key) = self
            .core
            .agents
            .register(
                self.owner.address,
                "payments-bot".to_string(),
                SpendingLimits {
                    max_per_transaction: 5_000_000,
                    daily_limit: 50_000_000,
                    allowed_resources: Vec::new(),
                },
                NOW,
            )
            .await
            .unwrap();

        let grant = Challenge::SessionGrant {
            agent_id: record.id,
            owner: self.owner.address,
            ts: NOW,
        };
        let grant_sig = self.owner.sign(grant.render().as_bytes());
        let (session, _kp) = self
            .core
            .sessions
            .grant(
                self.owner.address,
                record.id,
                NOW,
                &grant_sig,
                SessionLimits {
                    max_per_transaction: 2_000_000,
                    daily_limit: 5_000_000,
                },
                3_600,
                NOW,
            )
            .unwrap();
        self.core
            .agents
            .patch(
                &record.id,
                &self.owner.address,
                AgentPatch {
                    pool_link: Some(pool.id),
                    ..Default::default()
                },
            )
            .unwrap();

        let auth = SessionAuth {
            session_pk: session.public_key,
            agent: aegix_core::agent::AgentContext {
                agent_id: record.id,
                owner: self.owner.address,
            },
        };
        (pool, auth)
    }
}

fn request(pool: &aegix_core::pool::Pool, auth: SessionAuth, recipient: Address, amount: u64) -> PaymentRequest {
    PaymentRequest {
        pool_id: pool.id,
        recipient,
        amount,
        session: Some(auth),
        owner_auth: None,
        deadline: Duration::from_secs(30),
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gasless_happy_path_settles_through_the_facilitator() {
    let fee_payer = Address::from_bytes([0xF0; 32]);
    let h = harness("gasless", MockFacilitator::healthy(fee_payer));
    let (pool, auth) = h.prepared(2_000_000).await;

    let recipient = Address::from_bytes([9u8; 32]);
    h.chain.set_token_account(recipient, true);

    let session = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 1_000_000))
        .await
        .unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.mode, PaymentMode::Gasless);

    let kinds: Vec<LegKind> = session.legs.iter().map(|l| l.kind).collect();
    assert_eq!(
        kinds,
        vec![LegKind::FundSol, LegKind::FundAsset, LegKind::Payment, LegKind::Recovery]
    );
    assert_eq!(session.payment_signature().unwrap().as_str(), "settled-sig");

    // The facilitated transfer names F as fee payer and carries the
    // burner's partial signature.
    let settles = h.facilitator.settles.lock().unwrap();
    assert_eq!(settles.len(), 1);
    let tx = PreparedTransaction::decode(&settles[0].0.transaction).unwrap();
    assert_eq!(tx.fee_payer, fee_payer);
    assert!(tx.signatures.iter().any(|s| s.signer == session.burner));
    assert_eq!(settles[0].1.amount, 1_000_000);

    // Every leg is on the owner's audit ledger.
    let entries = h.core.audit.list(&h.owner.address).unwrap();
    let audit_kinds: Vec<LegKind> = entries.iter().map(|e| e.leg_kind).collect();
    assert_eq!(
        audit_kinds,
        vec![LegKind::FundSol, LegKind::FundAsset, LegKind::Payment, LegKind::Recovery]
    );
    assert!(entries.iter().all(|e| e.failure.is_none()));
    assert!(entries.iter().all(|e| e.privacy.gasless && e.privacy.compressed));
}

#[tokio::test]
async fn direct_fallback_when_facilitator_is_down() {
    let h = harness("direct", MockFacilitator::down());
    // No compressed funds: the engine takes the plain direct flow.
    let (pool, auth) = h.prepared(0).await;

    let recipient = Address::from_bytes([9u8; 32]);
    let session = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 1_000_000))
        .await
        .unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.mode, PaymentMode::Direct);

    // The user-visible return happens right after the payment leg; rent
    // recovery belongs to the background pass.
    let kinds: Vec<LegKind> = session.legs.iter().map(|l| l.kind).collect();
    assert_eq!(kinds, vec![LegKind::FundSol, LegKind::FundAsset, LegKind::Payment]);

    // Pool fronted the burner's gas in leg 1.
    let submitted = h.chain.submitted();
    match &submitted[0].0.instructions[0] {
        Instruction::TransferLamports { from, to, lamports } => {
            assert_eq!(*from, pool.public_key);
            assert_eq!(*to, session.burner);
            assert_eq!(*lamports, DIRECT_BURNER_FUND_LAMPORTS);
        }
        other => panic!("expected lamport funding first, got {other:?}"),
    }
    // Preflight is skipped on funding legs, retained on the payment leg.
    assert!(submitted[0].1 && submitted[1].1);
    assert!(!submitted[2].1);

    h.core.shutdown().await;
}

#[tokio::test]
async fn gasless_eligibility_does_not_mislabel_the_direct_fallback() {
    // Healthy facilitator, recipient holds an ATA — gasless-eligible — but
    // the pool has no compressed funds, so the plain pool-funded flow runs
    // and nothing about it may claim to be facilitated.
    let fee_payer = Address::from_bytes([0xF0; 32]);
    let h = harness("gasless_fallback", MockFacilitator::healthy(fee_payer));
    let (pool, auth) = h.prepared(0).await;

    let recipient = Address::from_bytes([9u8; 32]);
    h.chain.set_token_account(recipient, true);

    let session = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 1_000_000))
        .await
        .unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.mode, PaymentMode::Direct);

    // The facilitator was never settled against and no audit entry claims
    // a facilitated or compressed leg.
    assert!(h.facilitator.settles.lock().unwrap().is_empty());
    let entries = h.core.audit.list(&h.owner.address).unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| !e.privacy.gasless && !e.privacy.compressed));

    h.core.shutdown().await;
}

#[tokio::test]
async fn dust_is_swept_before_the_burner_closes() {
    let fee_payer = Address::from_bytes([0xF0; 32]);
    let h = harness("dust", MockFacilitator::healthy(fee_payer));
    let (pool, auth) = h.prepared(2_000_000).await;

    let recipient = Address::from_bytes([9u8; 32]);
    h.chain.set_token_account(recipient, true);
    // An adversary lands 1 micro-unit on the burner before close.
    h.chain.dust_on_close.store(1, Ordering::SeqCst);

    let session = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 1_000_000))
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Completed);

    // The close transaction sweeps the residual to the Recovery Pool's
    // token account strictly before the close instruction.
    let submitted = h.chain.submitted();
    let (close_tx, _) = submitted.last().unwrap();
    let burner_ata = token_account_address(&session.burner, &Address::from_bytes(MINT));
    let recovery = h.core.recovery.address(&h.owner.address).unwrap();

    let sweep_pos = close_tx
        .instructions
        .iter()
        .position(|ix| {
            matches!(ix, Instruction::TransferChecked { source, amount: 1, .. } if *source == burner_ata)
        })
        .expect("dust sweep present");
    let close_pos = close_tx
        .instructions
        .iter()
        .position(|ix| {
            matches!(ix, Instruction::CloseTokenAccount { account, destination, .. }
                if *account == burner_ata && *destination == recovery)
        })
        .expect("close present");
    assert!(sweep_pos < close_pos, "sweep must precede close");
}

#[tokio::test]
async fn reservation_failure_blocks_the_flow_before_any_chain_action() {
    let fee_payer = Address::from_bytes([0xF0; 32]);
    let h = harness("liquidity", MockFacilitator::healthy(fee_payer));
    let (pool, auth) = h.prepared(2_000_000).await;

    // Drain the recovery pool below the epsilon guard.
    let recovery = h.core.recovery.address(&h.owner.address).unwrap();
    h.chain.set_balance(recovery, 1_000);

    let recipient = Address::from_bytes([9u8; 32]);
    h.chain.set_token_account(recipient, true);

    let err = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 1_000_000))
        .await
        .unwrap_err();
    assert!(matches!(err, AegixError::InsufficientRecoveryLiquidity { .. }));

    // No assets moved.
    assert!(h.chain.submitted().is_empty());

    // The session record is terminal-Failed with the category recorded.
    let entries = h.core.audit.list(&h.owner.address).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.failure == Some(aegix_core::error::ErrorKind::InsufficientFunds)));
}

#[tokio::test]
async fn failed_payment_refunds_the_session_window() {
    let fee_payer = Address::from_bytes([0xF0; 32]);
    let h = harness("refund", MockFacilitator::healthy(fee_payer));
    let (pool, auth) = h.prepared(2_000_000).await;

    let recovery = h.core.recovery.address(&h.owner.address).unwrap();
    h.chain.set_balance(recovery, 1_000);
    let recipient = Address::from_bytes([9u8; 32]);
    h.chain.set_token_account(recipient, true);

    let before = h
        .core
        .sessions
        .validate(&auth.session_pk, 2_000_000, NOW)
        .unwrap();
    let _ = h
        .core
        .engine
        .execute(request(&pool, auth, recipient, 2_000_000))
        .await
        .unwrap_err();
    let after = h
        .core
        .sessions
        .validate(&auth.session_pk, 2_000_000, NOW)
        .unwrap();
    assert_eq!(
        before.remaining_daily_limit, after.remaining_daily_limit,
        "failed payments must not consume the daily window"
    );
}
