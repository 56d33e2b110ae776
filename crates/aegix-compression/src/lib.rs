//! aegix-compression
//!
//! Client for the ZK-compression provider: compressed balance reads,
//! compress/decompress construction, compressed transfers with validity
//! proofs, and the capability probe that turns a non-compression endpoint
//! into a clean `UnsupportedEnvironment` upfront.

pub mod client;
pub mod provider;

pub use client::{Capability, CompressionClient, Health};
pub use provider::{
    CompressedAccount, CompressionRpc, HttpCompressionRpc, StateTreeInfo, TokenPoolInfo,
    ValidityProof,
};
