//! aegix-chain
//!
//! The blockchain consumed as a capability: a transaction/instruction model
//! the gateway signs locally, plus the [`ChainRpc`] trait with its JSON-RPC
//! HTTP implementation. Every transaction built here carries a validity
//! horizon well below the network default.

pub mod rpc;
pub mod tx;

pub use rpc::{ChainRpc, HttpChainRpc};
pub use tx::{token_account_address, Blockhash, Instruction, PreparedTransaction, TxSig};
