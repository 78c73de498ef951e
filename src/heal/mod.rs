pub mod coordinator;
pub mod error;
pub mod health;
pub mod reconstruction;
pub mod types;

pub use coordinator::HealingCoordinator;
pub use error::{HealError, HealResult};
pub use health::{ArrayHealth, HealthEvaluator};
pub use reconstruction::ReconstructionEngine;
pub use types::{HealingEvent, HealingOutcome, ReconstructionOutcome, RecoveryMethod};
