//! aegix-rpc
//!
//! JSON-RPC 2.0 surface for the Aegix gateway.
//!
//! Namespace: "aegix"
//! Method families:
//!   pool lifecycle    — createPool / createMainPool / createCustomPool /
//!                       confirmCustomPool / listPools / deletePool /
//!                       fundPool / exportPoolKey / unlockPools / poolStats
//!   session lifecycle — createSession / sessionStatus / revokeSession
//!   payments          — executePayment / executeOwnerPayment / paymentStatus
//!   recovery pool     — initRecoveryPool / topUpRecoveryPool / recoveryPoolStatus
//!   agent lifecycle   — registerAgent / listAgents / patchAgent /
//!                       revealAgentKey / regenerateAgentKey / deleteAgent
//!   health            — health

pub mod api;
pub mod server;
pub mod types;

pub use server::RpcServer;
pub use types::{
    RpcAgent, RpcAgentCreated, RpcHealth, RpcPayment, RpcPool, RpcPoolCreated, RpcPoolStats,
    RpcRecoveryStatus, RpcSession, RpcUnlockReport,
};
