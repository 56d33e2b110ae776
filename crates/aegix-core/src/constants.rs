//! ─── Aegix Gateway Constants ────────────────────────────────────────────────
//!
//! Amounts are in micro-units for the stablecoin (1 token = 1,000,000 micro)
//! and lamports for the native gas asset (1 SOL = 1,000,000,000 lamports).

// ── Units ────────────────────────────────────────────────────────────────────

/// 1 stablecoin token expressed in micro-units.
pub const MICROS_PER_TOKEN: u64 = 1_000_000;

/// 1 SOL expressed in lamports.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ── Pool derivation ──────────────────────────────────────────────────────────

/// Domain-separation prefix for the deterministic pool seed.
pub const POOL_SEED_PREFIX: &[u8] = b"aegix-pool:";

/// A pool transitions Created → Funded when its observed asset balance first
/// exceeds this threshold.
pub const FUNDED_THRESHOLD_MICROS: u64 = 1_000;

/// Minimum Legacy-pool lamport balance required before a Main pool may be
/// created from it. Enforced unconditionally at `get_or_create_main`.
pub const MAIN_CREATE_MIN_LEGACY_LAMPORTS: u64 = 5_000_000;

// ── Session keys ─────────────────────────────────────────────────────────────

/// Upper bound a session grant duration is clamped to: 30 days.
pub const SESSION_MAX_DURATION_SECS: i64 = 30 * 24 * 3600;

/// Length of the rolling daily-limit window.
pub const SESSION_DAY_SECS: i64 = 24 * 3600;

// ── Signed challenges ────────────────────────────────────────────────────────

/// Maximum allowed skew between a challenge timestamp and the gateway clock.
pub const CHALLENGE_MAX_SKEW_MS: i64 = 5 * 60 * 1000;

// ── Recovery pool ────────────────────────────────────────────────────────────

/// Decompress operations allowed per sliding window, keyed on the Recovery
/// Pool address (burner keypairs are free to mint, so keying on the burner
/// would not bound anything).
pub const DECOMPRESS_RATE_LIMIT: u32 = 10;

/// Sliding-window length for the decompress rate limit.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Liquidity that must remain unreserved in the Recovery Pool at all times.
pub const RESERVATION_EPSILON_LAMPORTS: u64 = 1_000_000;

/// Rent-exempt balance of an SPL token account.
pub const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

/// Flat fee per transaction signature.
pub const TX_FEE_LAMPORTS: u64 = 5_000;

/// Lamports a pool fronts to a burner in the direct (non-compressed) flow:
/// enough native gas for three transactions plus token-account rent.
pub const DIRECT_BURNER_FUND_LAMPORTS: u64 = 6_000_000;

// ── Transaction construction ─────────────────────────────────────────────────

/// Compute-unit limit requested for transactions carrying ZK verification.
/// Substantially above the 200k default.
pub const ZK_COMPUTE_UNIT_LIMIT: u32 = 500_000;

/// Priority fee attached to facilitator-settled transfers.
pub const COMPUTE_UNIT_PRICE_MICRO_LAMPORTS: u64 = 10_000;

/// Every transaction built by the gateway expires this many blocks after the
/// fetched blockhash, well below the network default of ~150. Shrinks the
/// window for delayed-submission attacks.
pub const BLOCKHASH_VALIDITY_BLOCKS: u64 = 30;

// ── Payment engine ───────────────────────────────────────────────────────────

/// Retries of the payment leg (fresh blockhash each time) before the burner
/// is swept back and the session marked Failed.
pub const PAYMENT_RETRY_BUDGET: u32 = 3;

/// Default deadline for submit-and-confirm waits.
pub const CONFIRM_TIMEOUT_SECS: u64 = 60;

/// Delay before the background rent-recovery pass closes a direct-flow burner.
pub const DIRECT_RECOVERY_DELAY_SECS: u64 = 5;

// ── Caches / throttles ───────────────────────────────────────────────────────

/// Compression capability probe result is cached this long.
pub const HEALTH_CACHE_SECS: u64 = 30;

/// Facilitator fee-payer lookups are cached this long.
pub const FEE_PAYER_CACHE_SECS: u64 = 300;

/// Pool balance refreshes are throttled to once per this interval per address.
pub const BALANCE_REFRESH_SECS: u64 = 60;

// ── Persistence ──────────────────────────────────────────────────────────────

/// Version tag written into each persisted collection.
pub const STORE_VERSION: u32 = 1;
