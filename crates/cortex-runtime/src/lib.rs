//! Execution side of Cortex: sandboxed executor, verifier, target locks,
//! confirmation channel, the coordinator state machine and the rollback
//! engine.

pub mod confirmation;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod locks;
pub mod probe;
pub mod rollback;
pub mod verifier;

pub use confirmation::{
    AutoApprove, AutoDeny, ConfirmationAnswer, ConfirmationChannel, ConfirmationError,
    ConfirmationItem, ConfirmationRequest, PendingConfirmations, TerminalPrompt,
};
pub use coordinator::{AbortHandle, Coordinator, CoordinatorSettings, PlanState, RunReport};
pub use error::CoordinatorError;
pub use executor::{SandboxedExecutor, StepExecutor, bubblewrap_available};
pub use locks::{LockError, TargetGuard, TargetLocks, lock_keys};
pub use probe::{InstalledProbe, SystemProbe};
pub use rollback::{RollbackOptions, rollback_plan};
pub use verifier::Verifier;
