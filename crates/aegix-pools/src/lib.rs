//! aegix-pools
//!
//! The pool registry: durable store of pool metadata with the three-tier
//! hierarchy invariants (Legacy → Main → Custom), deterministic unlock,
//! two-phase Custom creation, and signature-gated key export.

pub mod registry;

pub use registry::{OrphanReport, PoolRegistry, PoolStats, UnlockReport};
