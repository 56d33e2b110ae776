//! Audit-ledger entry types. The ledger itself is append-only and
//! owner-enumerable through the sealed map; these are the records it holds.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::payment::LegKind;
use crate::types::{ChainSignature, MicroUnits, SessionId, TimestampMs};

/// Which privacy machinery covered the recorded leg.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyFlags {
    /// Asset moved through ZK-compressed state.
    pub compressed: bool,
    /// Fees settled by the external facilitator.
    pub gasless: bool,
}

/// One appended ledger record. Failed sessions record the failure category;
/// secret material never appears here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: SessionId,
    pub leg_kind: LegKind,
    pub chain_signature: Option<ChainSignature>,
    pub amount: Option<MicroUnits>,
    pub timestamp: TimestampMs,
    pub privacy: PrivacyFlags,
    #[serde(default)]
    pub failure: Option<ErrorKind>,
}
