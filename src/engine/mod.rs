//! Claim-and-lifecycle engine: request-driven claims and completions, and the
//! timer-driven sweep that ages tasks.

pub mod coordinator;
pub mod guard;
pub mod sweeper;

pub use coordinator::{ClaimConfig, ClaimCoordinator};
pub use guard::ActiveClaimGuard;
pub use sweeper::{LifecycleConfig, LifecycleSweeper, SweepReport};
