//! aegix-engine
//!
//! The payment-execution core: the multi-leg burner state machine with its
//! gasless and direct variants, the audit ledger, the facilitator client,
//! and the `Core` value wiring every component together.

pub mod audit;
pub mod burner;
pub mod core;
pub mod engine;
pub mod facilitator;

pub use audit::AuditLedger;
pub use burner::Burner;
pub use self::core::{Core, CoreConfig};
pub use engine::{EngineConfig, OwnerAuth, PaymentEngine, PaymentRequest, SessionAuth};
pub use facilitator::{
    Facilitator, FacilitatorGateway, HttpFacilitator, PaymentPayload, PaymentRequirements,
    SupportedNetwork,
};
