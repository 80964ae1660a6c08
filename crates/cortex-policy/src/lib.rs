//! Cortex security gate.
//!
//! Every plan passes through [`SecurityValidator`] before anything runs,
//! whether it came from a planner, a stack definition, or the rollback
//! engine. There is no bypass path.
//!
//! The validator is fail-closed: a single denied step rejects the plan as a
//! unit, and anything it cannot positively classify is denied.

pub mod allowlist;
pub mod denylist;
pub mod error;
pub mod invocation;
pub mod paths;
pub mod structure;
pub mod validator;

pub use error::{PolicyConfigError, ValidationError, ValidationErrorKind};
pub use invocation::Invocation;
pub use validator::SecurityValidator;
