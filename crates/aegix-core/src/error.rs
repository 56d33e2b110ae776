use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed failure taxonomy. Every [`AegixError`] variant maps onto
/// exactly one kind; the RPC layer derives its status class from this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed signature, bad amount, unknown pool type. → 400
    InputInvalid,
    /// Missing/invalid owner signature or paused agent. → 401/403
    AuthFailed,
    /// Attempts that would break the pool hierarchy invariants. → 403
    HierarchyViolation,
    /// Pool or recovery-pool balance below the needed reservation. → 400
    InsufficientFunds,
    /// Compression unavailable; facilitator offline. → 503
    UnsupportedEnvironment,
    /// Submission rejected, confirmation failed. → 502
    ChainError,
    /// Pool locked with no viable unlock strategy.
    Unrecoverable,
}

impl ErrorKind {
    /// HTTP status class surfaced by the gateway for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InputInvalid => 400,
            ErrorKind::AuthFailed => 401,
            ErrorKind::HierarchyViolation => 403,
            ErrorKind::InsufficientFunds => 400,
            ErrorKind::UnsupportedEnvironment => 503,
            ErrorKind::ChainError => 502,
            ErrorKind::Unrecoverable => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum AegixError {
    // ── Input / identifiers ──────────────────────────────────────────────────
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("malformed challenge message: {0}")]
    MalformedChallenge(String),

    #[error("challenge timestamp outside allowed skew ({skew_ms} ms)")]
    ChallengeExpired { skew_ms: i64 },

    // ── Authentication ───────────────────────────────────────────────────────
    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("caller is not the owner of this resource")]
    NotOwner,

    #[error("unknown agent API key")]
    AgentKeyInvalid,

    #[error("agent {0} is paused")]
    AgentPaused(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("recipient {0} is outside this agent's allowed resources")]
    RecipientNotAllowed(String),

    // ── Pool hierarchy ───────────────────────────────────────────────────────
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("legacy and main pools are immutable roots and cannot be deleted")]
    ImmutableRootPool,

    #[error("custom pool still has {agents} linked agent(s)")]
    PoolHasAgents { agents: u32 },

    #[error("no legacy pool exists for this owner")]
    LegacyPoolMissing,

    #[error("no main pool exists for this owner")]
    MainPoolMissing,

    #[error("funding edge {edge_source} → {target} is outside the pool hierarchy")]
    FundingEdgeForbidden { edge_source: String, target: String },

    #[error("legacy pool balance below creation minimum: need {need} lamports, have {have}")]
    LegacyBalanceBelowMinimum { need: u64, have: u64 },

    #[error("pool {0} awaits on-chain confirmation")]
    PoolUnconfirmed(String),

    // ── Key vault ────────────────────────────────────────────────────────────
    #[error("pool {0} is locked; present an owner signature to unlock")]
    PoolLocked(String),

    #[error("decryption produced the wrong public key")]
    SignatureMismatch,

    #[error("pool unrecoverable; import the key externally (public key {public_key})")]
    PoolUnrecoverable { public_key: String },

    #[error("cipher failure: {0}")]
    Cipher(String),

    // ── Sessions ─────────────────────────────────────────────────────────────
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session has expired")]
    SessionExpired,

    #[error("session has been revoked")]
    SessionRevoked,

    #[error("per-transaction cap exceeded: max {max} micro-units, got {got}")]
    PerTransactionCapExceeded { max: u64, got: u64 },

    #[error("daily limit exceeded; remaining {remaining_daily} micro-units")]
    LimitExceeded { remaining_daily: u64 },

    #[error("max_per_transaction must not exceed daily_limit")]
    LimitsInvalid,

    // ── Funds / liquidity ────────────────────────────────────────────────────
    #[error("insufficient pool funds: need {need}, have {have}")]
    InsufficientPoolFunds { need: u64, have: u64 },

    #[error("recovery pool cannot cover reservation: need {need} lamports, available {available}")]
    InsufficientRecoveryLiquidity { need: u64, available: u64 },

    #[error("decompress rate limit reached; retry in {retry_after_secs} s")]
    RateLimited { retry_after_secs: i64 },

    #[error("recovery pool not initialised for this owner")]
    RecoveryPoolMissing,

    // ── Environment ──────────────────────────────────────────────────────────
    #[error("rpc endpoint does not support ZK compression")]
    CompressionUnsupported,

    #[error("gasless facilitator unavailable: {0}")]
    FacilitatorUnavailable(String),

    // ── Chain ────────────────────────────────────────────────────────────────
    #[error("rpc transport error: {0}")]
    RpcTransport(String),

    #[error("transaction rejected: {0}")]
    TxRejected(String),

    #[error("confirmation deadline exceeded for {0}")]
    ConfirmationTimeout(String),

    #[error("recent blockhash expired before submission")]
    BlockhashExpired,

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sealed store error: {0}")]
    Sealed(String),

    #[error("{0}")]
    Other(String),
}

impl AegixError {
    /// Collapse onto the closed failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        use AegixError::*;
        match self {
            InvalidAddress(_) | InvalidIdentifier(_) | ZeroAmount | MalformedChallenge(_)
            | ChallengeExpired { .. } | LimitsInvalid | RateLimited { .. } => {
                ErrorKind::InputInvalid
            }

            SignatureInvalid | NotOwner | AgentKeyInvalid | AgentPaused(_) | AgentNotFound(_)
            | RecipientNotAllowed(_) | SessionExpired | SessionRevoked
            | PerTransactionCapExceeded { .. } | LimitExceeded { .. } => ErrorKind::AuthFailed,

            ImmutableRootPool | PoolHasAgents { .. } | LegacyPoolMissing | MainPoolMissing
            | FundingEdgeForbidden { .. } | PoolUnconfirmed(_) => ErrorKind::HierarchyViolation,

            InsufficientPoolFunds { .. }
            | InsufficientRecoveryLiquidity { .. }
            | LegacyBalanceBelowMinimum { .. }
            | RecoveryPoolMissing => ErrorKind::InsufficientFunds,

            CompressionUnsupported | FacilitatorUnavailable(_) => {
                ErrorKind::UnsupportedEnvironment
            }

            RpcTransport(_) | TxRejected(_) | ConfirmationTimeout(_) | BlockhashExpired => {
                ErrorKind::ChainError
            }

            PoolLocked(_) | SignatureMismatch | PoolUnrecoverable { .. } | Cipher(_) => {
                ErrorKind::Unrecoverable
            }

            PoolNotFound(_) | SessionNotFound(_) => ErrorKind::InputInvalid,

            Serialization(_) | Storage(_) | Sealed(_) | Other(_) => ErrorKind::ChainError,
        }
    }

    /// Stable machine-readable code attached to RPC error payloads.
    pub fn code(&self) -> &'static str {
        use AegixError::*;
        match self {
            ImmutableRootPool => "IMMUTABLE_ROOT",
            PoolHasAgents { .. } | NotOwner | RecipientNotAllowed(_) => "FORBIDDEN",
            LimitExceeded { .. } | PerTransactionCapExceeded { .. } => "LIMIT_EXCEEDED",
            AgentKeyInvalid | AgentPaused(_) => "AGENT_AUTH",
            SignatureInvalid | ChallengeExpired { .. } | MalformedChallenge(_) => "BAD_SIGNATURE",
            CompressionUnsupported => "NO_COMPRESSION",
            FacilitatorUnavailable(_) => "FACILITATOR_DOWN",
            RateLimited { .. } => "RATE_LIMITED",
            InsufficientPoolFunds { .. }
            | InsufficientRecoveryLiquidity { .. }
            | LegacyBalanceBelowMinimum { .. } => "INSUFFICIENT_FUNDS",
            PoolUnrecoverable { .. } => "UNRECOVERABLE",
            _ => "ERROR",
        }
    }
}
