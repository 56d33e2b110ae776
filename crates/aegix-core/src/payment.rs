//! Payment-session types: the multi-leg state machine record and its
//! audit-visible legs.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{Address, ChainSignature, MicroUnits, PoolId, SessionId, TimestampMs};

// ── PaymentMode ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMode {
    /// An external facilitator pays the native fee on behalf of the burner.
    Gasless,
    /// The gateway pays fees from its own pools.
    Direct,
}

// ── LegKind ──────────────────────────────────────────────────────────────────

/// The observable legs of one payment session, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegKind {
    /// Native gas or rent moved into the burner (ATA create / SOL fund).
    FundSol,
    /// Asset moved into the burner (decompress or plain transfer).
    FundAsset,
    /// Burner → recipient transfer. The only leg the recipient observes.
    Payment,
    /// Close-and-sweep back to the funding side.
    Recovery,
}

// ── Leg ──────────────────────────────────────────────────────────────────────

/// One executed (or attempted) leg with its on-chain proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Leg {
    pub kind: LegKind,
    pub chain_signature: Option<ChainSignature>,
    pub timestamp: TimestampMs,
}

// ── SessionState ─────────────────────────────────────────────────────────────

/// Payment state machine. Any state may transition to Failed;
/// Completed and Failed are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initialized,
    BurnerCreated,
    AssetInBurner,
    Sent,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

// ── BurnerState ──────────────────────────────────────────────────────────────

/// Lifecycle of an ephemeral burner keypair. After Recovered the record is
/// retained for audit only and the secret must be zeroized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurnerState {
    Created,
    Funded,
    Used,
    Recovered,
}

// ── PaymentSession ───────────────────────────────────────────────────────────

/// The durable record of one payment through a burner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: SessionId,
    pub owner: Address,
    pub pool_id: PoolId,
    pub burner: Address,
    pub recipient: Address,
    pub amount: MicroUnits,
    pub mode: PaymentMode,
    /// Asset moved through ZK-compressed state in this session.
    #[serde(default)]
    pub compressed: bool,
    pub legs: Vec<Leg>,
    pub state: SessionState,
    /// Failure category recorded when `state == Failed`. Never carries
    /// secret material.
    pub failure: Option<ErrorKind>,
    pub started_at: TimestampMs,
}

impl PaymentSession {
    /// The confirmed signature of the Payment leg, present iff Completed.
    pub fn payment_signature(&self) -> Option<&ChainSignature> {
        self.legs
            .iter()
            .find(|l| l.kind == LegKind::Payment)
            .and_then(|l| l.chain_signature.as_ref())
    }

    pub fn push_leg(&mut self, kind: LegKind, sig: Option<ChainSignature>, now: TimestampMs) {
        self.legs.push(Leg {
            kind,
            chain_signature: sig,
            timestamp: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoolId, SessionId};

    fn session() -> PaymentSession {
        PaymentSession {
            session_id: SessionId([1u8; 16]),
            owner: Address::from_bytes([2u8; 32]),
            pool_id: PoolId([3u8; 16]),
            burner: Address::from_bytes([4u8; 32]),
            recipient: Address::from_bytes([5u8; 32]),
            amount: 1_000_000,
            mode: PaymentMode::Gasless,
            compressed: false,
            legs: Vec::new(),
            state: SessionState::Initialized,
            failure: None,
            started_at: 0,
        }
    }

    #[test]
    fn payment_signature_tracks_the_payment_leg_only() {
        let mut s = session();
        s.push_leg(LegKind::FundSol, Some(ChainSignature("a".into())), 1);
        assert!(s.payment_signature().is_none());
        s.push_leg(LegKind::Payment, Some(ChainSignature("b".into())), 2);
        assert_eq!(s.payment_signature().unwrap().as_str(), "b");
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Sent.is_terminal());
    }
}
