pub mod agent;
pub mod audit;
pub mod challenge;
pub mod constants;
pub mod error;
pub mod payment;
pub mod pool;
pub mod session;
pub mod types;

pub use agent::{AgentContext, AgentRecord, SpendingLimits};
pub use audit::{AuditEntry, PrivacyFlags};
pub use challenge::Challenge;
pub use constants::*;
pub use error::{AegixError, ErrorKind};
pub use payment::{BurnerState, Leg, LegKind, PaymentMode, PaymentSession, SessionState};
pub use pool::{EncryptedSecret, FundingState, Pool, PoolType};
pub use session::{SessionKey, SessionLimits, SessionStatus};
pub use types::*;
