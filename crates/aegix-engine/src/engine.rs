//! The payment-execution state machine.
//!
//! One payment session walks `Initialized → BurnerCreated → AssetInBurner →
//! Sent → Completed`, any state may fall to `Failed`, and both ends are
//! terminal. Legs within a session are strictly sequential; across sessions
//! only the payment leg races, because every rent-bearing account creation
//! is funded through the Recovery Pool's reservation table.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use aegix_agents::AgentRegistry;
use aegix_chain::rpc::ChainRpc;
use aegix_chain::tx::{token_account_address, Instruction, PreparedTransaction};
use aegix_compression::CompressionClient;
use aegix_core::agent::AgentContext;
use aegix_core::audit::{AuditEntry, PrivacyFlags};
use aegix_core::challenge::Challenge;
use aegix_core::constants::{
    COMPUTE_UNIT_PRICE_MICRO_LAMPORTS, DIRECT_BURNER_FUND_LAMPORTS, DIRECT_RECOVERY_DELAY_SECS,
    PAYMENT_RETRY_BUDGET, TOKEN_ACCOUNT_RENT_LAMPORTS, TX_FEE_LAMPORTS, ZK_COMPUTE_UNIT_LIMIT,
};
use aegix_core::error::AegixError;
use aegix_core::payment::{
    BurnerState, LegKind, PaymentMode, PaymentSession, SessionState,
};
use aegix_core::pool::Pool;
use aegix_core::types::{
    Address, ChainSignature, MicroUnits, PoolId, ReservationId, SessionId, TimestampMs,
};
use aegix_crypto::keypair::{verify_signature, KeyPair};
use aegix_pools::PoolRegistry;
use aegix_recovery::RecoveryPoolManager;
use aegix_session::SessionKeyManager;
use aegix_store::GatewayStore;

use crate::audit::AuditLedger;
use crate::burner::Burner;
use crate::facilitator::{FacilitatorGateway, PaymentPayload, PaymentRequirements};

fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

// ── Request types ────────────────────────────────────────────────────────────

/// Agent-initiated authority: a session key plus the authenticated agent.
#[derive(Clone, Copy, Debug)]
pub struct SessionAuth {
    pub session_pk: Address,
    pub agent: AgentContext,
}

/// Owner-initiated authority: a signature over
/// `AEGIX_TRANSFER::{pool}::{recipient}::{amount}::{ts}`.
#[derive(Clone, Copy, Debug)]
pub struct OwnerAuth {
    pub challenge_ts: TimestampMs,
    pub signature: [u8; 64],
}

pub struct PaymentRequest {
    pub pool_id: PoolId,
    pub recipient: Address,
    pub amount: MicroUnits,
    pub session: Option<SessionAuth>,
    pub owner_auth: Option<OwnerAuth>,
    /// Bounds every confirmation wait in this session.
    pub deadline: Duration,
}

pub struct EngineConfig {
    pub network: String,
    pub mint: Address,
}

// ── PaymentEngine ────────────────────────────────────────────────────────────

pub struct PaymentEngine {
    chain: Arc<dyn ChainRpc>,
    compression: Arc<CompressionClient>,
    pools: Arc<PoolRegistry>,
    sessions: Arc<SessionKeyManager>,
    recovery: Arc<RecoveryPoolManager>,
    agents: Arc<AgentRegistry>,
    audit: Arc<AuditLedger>,
    store: Arc<GatewayStore>,
    facilitator: Arc<FacilitatorGateway>,
    config: EngineConfig,
    shutdown: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PaymentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        compression: Arc<CompressionClient>,
        pools: Arc<PoolRegistry>,
        sessions: Arc<SessionKeyManager>,
        recovery: Arc<RecoveryPoolManager>,
        agents: Arc<AgentRegistry>,
        audit: Arc<AuditLedger>,
        store: Arc<GatewayStore>,
        facilitator: Arc<FacilitatorGateway>,
        config: EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain,
            compression,
            pools,
            sessions,
            recovery,
            agents,
            audit,
            store,
            facilitator,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Await every background recovery task (called on Core shutdown, after
    /// the shutdown signal fires).
    pub async fn drain_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("task lock"));
        for task in tasks {
            let _ = task.await;
        }
    }

    // ── Entry point ──────────────────────────────────────────────────────────

    /// Execute one payment. Session limits are validated and debited before
    /// any on-chain action; a failed session is re-credited.
    pub async fn execute(&self, request: PaymentRequest) -> Result<PaymentSession, AegixError> {
        let now = now_ms();
        if request.amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        let pool = self.pools.get(&request.pool_id)?;
        let debited = self.authorize(&pool, &request, now)?;

        let burner = Burner::generate();
        let mut session = PaymentSession {
            session_id: SessionId::generate(),
            owner: pool.owner,
            pool_id: pool.id,
            burner: burner.address,
            recipient: request.recipient,
            amount: request.amount,
            mode: PaymentMode::Direct,
            compressed: false,
            legs: Vec::new(),
            state: SessionState::Initialized,
            failure: None,
            started_at: now,
        };
        self.store.put_payment(&session)?;

        let result = self.run(&mut session, &pool, burner, &request).await;
        if let Err(e) = result {
            warn!(session = %session.session_id, error = %e, "payment failed");
            session.state = SessionState::Failed;
            session.failure = Some(e.kind());
            if let Some(auth) = debited {
                // Refund both windows for value that never moved.
                let _ = self.sessions.credit(&auth.session_pk, request.amount);
                let _ = self.agents.credit_spend(&auth.agent.agent_id, request.amount);
            }
            self.store.put_payment(&session)?;
            self.append_audit(&session, LegKind::Payment, None, Some(request.amount), Some(e.kind()))
                .await;
            return Err(e);
        }

        self.pools.note_payment(&pool.id)?;
        self.store.put_payment(&session)?;
        Ok(session)
    }

    /// Both authorities verify before any state change; agent spending caps
    /// compose with the session-key limits.
    fn authorize(
        &self,
        pool: &Pool,
        request: &PaymentRequest,
        now: TimestampMs,
    ) -> Result<Option<SessionAuth>, AegixError> {
        if let Some(auth) = request.session {
            let session = self
                .sessions
                .get(&auth.session_pk)
                .ok_or_else(|| AegixError::SessionNotFound(auth.session_pk.short()))?;
            if session.owner != pool.owner {
                return Err(AegixError::NotOwner);
            }
            // Both caps reserve atomically up front; the agent side is
            // compensated if the session window refuses.
            self.agents.debit_spend(
                &auth.agent.agent_id,
                &request.recipient,
                request.amount,
                now,
            )?;
            if let Err(e) = self.sessions.debit(&auth.session_pk, request.amount, now) {
                let _ = self.agents.credit_spend(&auth.agent.agent_id, request.amount);
                return Err(e);
            }
            return Ok(Some(auth));
        }

        let owner_auth = request
            .owner_auth
            .ok_or(AegixError::SignatureInvalid)?;
        let challenge = Challenge::Transfer {
            source: pool.public_key,
            target: request.recipient,
            amount: request.amount,
            ts: owner_auth.challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(
            &pool.owner,
            challenge.render().as_bytes(),
            &owner_auth.signature,
        )?;
        Ok(None)
    }

    // ── Flow dispatch ────────────────────────────────────────────────────────

    async fn run(
        &self,
        session: &mut PaymentSession,
        pool: &Pool,
        mut burner: Burner,
        request: &PaymentRequest,
    ) -> Result<(), AegixError> {
        // Privacy-preserving flow iff the endpoint supports compression and
        // the pool's compressed holdings cover the amount.
        let compressed_funds = match self
            .compression
            .compressed_balance(&pool.public_key, &self.config.mint)
            .await
        {
            Ok(balance) => balance >= request.amount,
            Err(AegixError::CompressionUnsupported) => false,
            Err(e) => return Err(e),
        };

        // The fallback flow is entirely pool-funded and self-fee-paid, so
        // the facilitator never enters the picture there.
        if !compressed_funds {
            session.mode = PaymentMode::Direct;
            return self.direct_flow(session, pool, &mut burner, request).await;
        }
        session.compressed = true;

        // Gasless iff the facilitator advertises this network AND the
        // recipient already holds a token account (no rent during the
        // facilitated leg).
        let fee_payer = self.facilitator.fee_payer_for(&self.config.network).await;
        let recipient_has_ata = self
            .chain
            .token_account_exists(&request.recipient, &self.config.mint)
            .await
            .unwrap_or(false);
        session.mode = match fee_payer {
            Some(_) if recipient_has_ata => PaymentMode::Gasless,
            _ => PaymentMode::Direct,
        };
        self.compressed_flow(session, pool, &mut burner, request, fee_payer)
            .await
    }

    async fn append_audit(
        &self,
        session: &PaymentSession,
        kind: LegKind,
        sig: Option<ChainSignature>,
        amount: Option<MicroUnits>,
        failure: Option<aegix_core::error::ErrorKind>,
    ) {
        let entry = AuditEntry {
            session_id: session.session_id,
            leg_kind: kind,
            chain_signature: sig,
            amount,
            timestamp: now_ms(),
            privacy: PrivacyFlags {
                compressed: session.compressed,
                gasless: session.mode == PaymentMode::Gasless,
            },
            failure,
        };
        if let Err(e) = self.audit.append(&session.owner, &entry).await {
            warn!(error = %e, "audit append failed");
        }
    }

    // ── Compressed-privacy flow ──────────────────────────────────────────────

    /// compress → pool → burner → decompress-in-burner → transfer →
    /// close-and-sweep. The Recovery Pool fronts every lamport of rent.
    async fn compressed_flow(
        &self,
        session: &mut PaymentSession,
        pool: &Pool,
        burner: &mut Burner,
        request: &PaymentRequest,
        facilitator_fee_payer: Option<Address>,
    ) -> Result<(), AegixError> {
        let owner = pool.owner;
        let recovery_kp = self.recovery.keypair(&owner)?;
        let recovery = recovery_kp.address;
        let mint = self.config.mint;

        // Refresh observed liquidity, then reserve before anything moves.
        let balance = self.chain.get_balance(&recovery).await?;
        self.recovery.sync_balance(&owner, balance)?;

        let recipient_needs_ata = session.mode == PaymentMode::Direct
            && !self
                .chain
                .token_account_exists(&request.recipient, &mint)
                .await
                .unwrap_or(false);
        let needed = TOKEN_ACCOUNT_RENT_LAMPORTS
            + 4 * TX_FEE_LAMPORTS
            + if recipient_needs_ata { TOKEN_ACCOUNT_RENT_LAMPORTS } else { 0 };

        let reservation = ReservationId::generate();
        self.recovery.reserve(&owner, needed, reservation)?;

        let result = self
            .compressed_legs(session, pool, burner, request, facilitator_fee_payer, &recovery_kp, recipient_needs_ata)
            .await;
        // Released on every exit path, success included.
        self.recovery.release(&owner, &reservation);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn compressed_legs(
        &self,
        session: &mut PaymentSession,
        pool: &Pool,
        burner: &mut Burner,
        request: &PaymentRequest,
        facilitator_fee_payer: Option<Address>,
        recovery_kp: &KeyPair,
        recipient_needs_ata: bool,
    ) -> Result<(), AegixError> {
        let mint = self.config.mint;
        let recovery = recovery_kp.address;
        let deadline = request.deadline;
        let burner_ata = token_account_address(&burner.address, &mint);

        // ── Leg 1: burner ATA create, rent fronted by the Recovery Pool ──────
        let mut tx = PreparedTransaction::new(
            recovery,
            vec![Instruction::CreateTokenAccount {
                payer: recovery,
                owner: burner.address,
                mint,
            }],
        );
        self.anchor_and_sign(&mut tx, &[recovery_kp]).await?;
        let sig = self.chain.send_and_confirm(&tx, true, deadline).await?;
        session.push_leg(LegKind::FundSol, Some(sig.clone()), now_ms());
        session.state = SessionState::BurnerCreated;
        burner.mark(BurnerState::Funded);
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::FundSol, Some(sig), None, None).await;

        // ── Leg 2: move asset into the burner and decompress ─────────────────
        self.recovery.admit_decompress(&pool.owner, now_ms())?;

        let pool_kp = self.pools.unlocked_keypair(&pool.id)?;
        let shift = self
            .compression
            .build_compressed_transfer_with_fee_payer(
                &pool_kp,
                recovery_kp,
                &burner.address,
                request.amount,
                &mint,
            )
            .await?;
        self.chain.send_and_confirm(&shift, true, deadline).await?;

        // Recovery pays the fee; the burner authorizes the compressed spend.
        let mut decompress = self
            .compression
            .decompress(&burner.address, request.amount, &mint, &recovery)
            .await?;
        decompress.partial_sign(burner.keypair()?)?;
        decompress.partial_sign(recovery_kp)?;
        let sig = self.chain.send_and_confirm(&decompress, true, deadline).await?;
        session.push_leg(LegKind::FundAsset, Some(sig.clone()), now_ms());
        session.state = SessionState::AssetInBurner;
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::FundAsset, Some(sig), Some(request.amount), None)
            .await;

        // ── Leg 3: burner → recipient ────────────────────────────────────────
        let sig = self
            .payment_leg(session, burner, request, facilitator_fee_payer, recovery_kp, recipient_needs_ata)
            .await;
        let sig = match sig {
            Ok(sig) => sig,
            Err(e) => {
                // Retry budget exhausted: sweep whatever the burner holds
                // back to the Recovery Pool before failing the session.
                let _ = self
                    .close_burner(burner, recovery_kp, &burner_ata, deadline)
                    .await;
                return Err(e);
            }
        };
        session.push_leg(LegKind::Payment, Some(sig.clone()), now_ms());
        session.state = SessionState::Sent;
        burner.mark(BurnerState::Used);
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::Payment, Some(sig), Some(request.amount), None)
            .await;

        // ── Leg 4: close and sweep ───────────────────────────────────────────
        match self
            .close_burner(burner, recovery_kp, &burner_ata, deadline)
            .await
        {
            Ok(sig) => {
                self.recovery
                    .record_recovered(&pool.owner, TOKEN_ACCOUNT_RENT_LAMPORTS);
                self.pools
                    .record_sol_recovered(&pool.id, TOKEN_ACCOUNT_RENT_LAMPORTS)?;
                session.push_leg(LegKind::Recovery, Some(sig.clone()), now_ms());
                self.append_audit(session, LegKind::Recovery, Some(sig), None, None).await;
            }
            Err(e) => {
                // Non-fatal: the payment stands, rent remains recoverable.
                warn!(burner = %burner.address.short(), error = %e, "burner close failed; reconciler will retry");
                session.push_leg(LegKind::Recovery, None, now_ms());
                self.append_audit(session, LegKind::Recovery, None, None, None).await;
            }
        }
        burner.retire();
        session.state = SessionState::Completed;
        Ok(())
    }

    /// The burner→recipient transfer, gasless or direct.
    async fn payment_leg(
        &self,
        session: &mut PaymentSession,
        burner: &Burner,
        request: &PaymentRequest,
        facilitator_fee_payer: Option<Address>,
        recovery_kp: &KeyPair,
        recipient_needs_ata: bool,
    ) -> Result<ChainSignature, AegixError> {
        let mint = self.config.mint;
        let burner_ata = token_account_address(&burner.address, &mint);
        let recipient_ata = token_account_address(&request.recipient, &mint);
        let transfer = Instruction::TransferChecked {
            source: burner_ata,
            destination: recipient_ata,
            authority: burner.address,
            mint,
            amount: request.amount,
            decimals: 6,
        };

        if session.mode == PaymentMode::Gasless {
            let fee_payer = facilitator_fee_payer.ok_or_else(|| {
                AegixError::FacilitatorUnavailable("fee payer vanished".to_string())
            })?;
            let mut tx = PreparedTransaction::new(
                fee_payer,
                vec![
                    Instruction::ComputeBudgetLimit {
                        units: ZK_COMPUTE_UNIT_LIMIT,
                    },
                    Instruction::ComputeBudgetPrice {
                        micro_lamports: COMPUTE_UNIT_PRICE_MICRO_LAMPORTS,
                    },
                    transfer,
                ],
            );
            let (hash, height) = self.chain.latest_blockhash().await?;
            tx.set_blockhash(hash, height);
            tx.partial_sign(burner.keypair()?)?;

            let payload = PaymentPayload {
                transaction: tx.encode()?,
            };
            let requirements = PaymentRequirements {
                network: self.config.network.clone(),
                recipient: request.recipient.to_b58(),
                amount: request.amount,
                mint: mint.to_b58(),
            };
            // A settle that never returns a signature is a ChainError; it is
            // never retried against the facilitator.
            let sig = self.facilitator.settle(&payload, &requirements).await?;
            self.chain.confirm(&sig, request.deadline).await?;
            return Ok(sig);
        }

        // Direct: Recovery Pool pays, preflight stays on, retries take a
        // fresh blockhash each attempt.
        let mut instructions = Vec::new();
        if recipient_needs_ata {
            instructions.push(Instruction::CreateTokenAccount {
                payer: recovery_kp.address,
                owner: request.recipient,
                mint,
            });
        }
        instructions.push(transfer);

        let mut last_err = AegixError::TxRejected("no attempt made".to_string());
        for attempt in 0..PAYMENT_RETRY_BUDGET {
            let mut tx = PreparedTransaction::new(recovery_kp.address, instructions.clone());
            self.anchor_and_sign(&mut tx, &[recovery_kp, burner.keypair()?]).await?;
            match self.chain.send_and_confirm(&tx, false, request.deadline).await {
                Ok(sig) => return Ok(sig),
                Err(e) if e.kind() == aegix_core::error::ErrorKind::ChainError => {
                    warn!(attempt, error = %e, "payment leg attempt failed");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Sweep any residual balance ("dust attack"), then close. The close
    /// instruction is only ever built against a zero post-sweep balance.
    async fn close_burner(
        &self,
        burner: &Burner,
        recovery_kp: &KeyPair,
        burner_ata: &Address,
        deadline: Duration,
    ) -> Result<ChainSignature, AegixError> {
        let mint = self.config.mint;
        let recovery = recovery_kp.address;
        let dust = self.chain.get_token_balance(burner_ata).await.unwrap_or(0);

        let mut instructions = Vec::new();
        if dust > 0 {
            let recovery_ata = token_account_address(&recovery, &mint);
            if !self
                .chain
                .token_account_exists(&recovery, &mint)
                .await
                .unwrap_or(false)
            {
                instructions.push(Instruction::CreateTokenAccount {
                    payer: recovery,
                    owner: recovery,
                    mint,
                });
            }
            instructions.push(Instruction::TransferChecked {
                source: *burner_ata,
                destination: recovery_ata,
                authority: burner.address,
                mint,
                amount: dust,
                decimals: 6,
            });
        }
        instructions.push(Instruction::CloseTokenAccount {
            account: *burner_ata,
            destination: recovery,
            authority: burner.address,
        });

        let mut tx = PreparedTransaction::new(recovery, instructions);
        self.anchor_and_sign(&mut tx, &[recovery_kp, burner.keypair()?]).await?;
        self.chain.send_and_confirm(&tx, true, deadline).await
    }

    async fn anchor_and_sign(
        &self,
        tx: &mut PreparedTransaction,
        signers: &[&KeyPair],
    ) -> Result<(), AegixError> {
        let (hash, height) = self.chain.latest_blockhash().await?;
        tx.set_blockhash(hash, height);
        for kp in signers {
            tx.partial_sign(kp)?;
        }
        Ok(())
    }

    // ── Direct, non-compressed fallback ──────────────────────────────────────

    /// Pool funds the burner with native gas, sends it the asset, the burner
    /// pays, and rent recovery runs after the user-visible return so latency
    /// is bounded by the payment leg. One blockhash is reused within its
    /// validity window; preflight runs only on the payment leg.
    async fn direct_flow(
        &self,
        session: &mut PaymentSession,
        pool: &Pool,
        burner: &mut Burner,
        request: &PaymentRequest,
    ) -> Result<(), AegixError> {
        // No leg of this flow is facilitated.
        session.mode = PaymentMode::Direct;
        let mint = self.config.mint;
        let deadline = request.deadline;
        let pool_kp = self.pools.unlocked_keypair(&pool.id)?;
        let burner_ata = token_account_address(&burner.address, &mint);
        let pool_ata = token_account_address(&pool.public_key, &mint);
        let (hash, height) = self.chain.latest_blockhash().await?;

        // ── Leg 1: fund burner with gas + its token account ──────────────────
        let mut tx = PreparedTransaction::new(
            pool.public_key,
            vec![
                Instruction::TransferLamports {
                    from: pool.public_key,
                    to: burner.address,
                    lamports: DIRECT_BURNER_FUND_LAMPORTS,
                },
                Instruction::CreateTokenAccount {
                    payer: pool.public_key,
                    owner: burner.address,
                    mint,
                },
            ],
        );
        tx.set_blockhash(hash, height);
        tx.partial_sign(&pool_kp)?;
        let sig = self.chain.send_and_confirm(&tx, true, deadline).await?;
        session.push_leg(LegKind::FundSol, Some(sig.clone()), now_ms());
        session.state = SessionState::BurnerCreated;
        burner.mark(BurnerState::Funded);
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::FundSol, Some(sig), None, None).await;

        // ── Leg 2: pool sends asset to burner (same blockhash) ───────────────
        let mut tx = PreparedTransaction::new(
            pool.public_key,
            vec![Instruction::TransferChecked {
                source: pool_ata,
                destination: burner_ata,
                authority: pool.public_key,
                mint,
                amount: request.amount,
                decimals: 6,
            }],
        );
        tx.set_blockhash(hash, height);
        tx.partial_sign(&pool_kp)?;
        let sig = self.chain.send_and_confirm(&tx, true, deadline).await?;
        session.push_leg(LegKind::FundAsset, Some(sig.clone()), now_ms());
        session.state = SessionState::AssetInBurner;
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::FundAsset, Some(sig), Some(request.amount), None)
            .await;

        // ── Leg 3: burner pays recipient; preflight retained ─────────────────
        let recipient_ata = token_account_address(&request.recipient, &mint);
        let recipient_needs_ata = !self
            .chain
            .token_account_exists(&request.recipient, &mint)
            .await
            .unwrap_or(false);
        let mut instructions = Vec::new();
        if recipient_needs_ata {
            instructions.push(Instruction::CreateTokenAccount {
                payer: burner.address,
                owner: request.recipient,
                mint,
            });
        }
        instructions.push(Instruction::TransferChecked {
            source: burner_ata,
            destination: recipient_ata,
            authority: burner.address,
            mint,
            amount: request.amount,
            decimals: 6,
        });

        let mut last_err = AegixError::TxRejected("no attempt made".to_string());
        let mut payment_sig = None;
        for attempt in 0..PAYMENT_RETRY_BUDGET {
            let mut tx = PreparedTransaction::new(burner.address, instructions.clone());
            if attempt == 0 {
                tx.set_blockhash(hash, height);
            } else {
                let (fresh, fresh_height) = self.chain.latest_blockhash().await?;
                tx.set_blockhash(fresh, fresh_height);
            }
            tx.partial_sign(burner.keypair()?)?;
            match self.chain.send_and_confirm(&tx, false, deadline).await {
                Ok(sig) => {
                    payment_sig = Some(sig);
                    break;
                }
                Err(e) if e.kind() == aegix_core::error::ErrorKind::ChainError => {
                    warn!(attempt, error = %e, "direct payment attempt failed");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        let sig = payment_sig.ok_or(last_err)?;
        session.push_leg(LegKind::Payment, Some(sig.clone()), now_ms());
        session.state = SessionState::Sent;
        burner.mark(BurnerState::Used);
        self.store.put_payment(session)?;
        self.append_audit(session, LegKind::Payment, Some(sig), Some(request.amount), None)
            .await;

        // ── User-visible completion; recovery happens in the background ──────
        session.state = SessionState::Completed;
        self.spawn_direct_recovery(session, pool, burner);
        Ok(())
    }

    /// Supervised background task: after a short delay, close the burner's
    /// token account and return rent plus leftover gas to the pool. The
    /// Core's shutdown signal cancels the wait deterministically.
    fn spawn_direct_recovery(&self, session: &PaymentSession, pool: &Pool, burner: &mut Burner) {
        let Ok(burner_kp) = burner.keypair().cloned() else {
            return;
        };
        burner.retire();

        let chain = Arc::clone(&self.chain);
        let pools = Arc::clone(&self.pools);
        let audit = Arc::clone(&self.audit);
        let mint = self.config.mint;
        let pool_id = pool.id;
        let pool_pk = pool.public_key;
        let owner = session.owner;
        let session_id = session.session_id;
        let mut shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(DIRECT_RECOVERY_DELAY_SECS)) => {}
                _ = shutdown.changed() => {
                    info!(session = %session_id, "shutdown before burner recovery; reconciler will sweep");
                    return;
                }
            }

            let burner_ata = token_account_address(&burner_kp.address, &mint);
            let mut tx = PreparedTransaction::new(
                burner_kp.address,
                vec![Instruction::CloseTokenAccount {
                    account: burner_ata,
                    destination: pool_pk,
                    authority: burner_kp.address,
                }],
            );
            let result = async {
                let (hash, height) = chain.latest_blockhash().await?;
                tx.set_blockhash(hash, height);
                tx.partial_sign(&burner_kp)?;
                chain
                    .send_and_confirm(&tx, true, Duration::from_secs(30))
                    .await
            }
            .await;

            match result {
                Ok(sig) => {
                    let _ = pools.record_sol_recovered(&pool_id, TOKEN_ACCOUNT_RENT_LAMPORTS);
                    let entry = AuditEntry {
                        session_id,
                        leg_kind: LegKind::Recovery,
                        chain_signature: Some(sig),
                        amount: None,
                        timestamp: now_ms(),
                        privacy: PrivacyFlags::default(),
                        failure: None,
                    };
                    let _ = audit.append(&owner, &entry).await;
                }
                Err(e) => {
                    warn!(error = %e, "background burner recovery failed");
                }
            }
        });
        self.tasks.lock().expect("task lock").push(handle);
    }

    /// Look up a payment session for the status surface.
    pub fn payment_status(&self, id: &SessionId) -> Result<Option<PaymentSession>, AegixError> {
        self.store.get_payment(id)
    }
}
