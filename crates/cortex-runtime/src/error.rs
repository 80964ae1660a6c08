//! Coordinator errors.
//!
//! Validation and confirmation errors are raised before anything touches the
//! system or the store. Execution failures are not errors at this level: they
//! end up in a sealed transaction. Only store failures interrupt a running
//! plan.

use cortex_core::{RuleId, TransactionId};
use cortex_history::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A step was denied; the plan never ran.
    #[error("plan denied at step {step_index} [{}]: {justification}", rule_name(.rule))]
    ValidationDenied {
        step_index: usize,
        rule: Option<RuleId>,
        justification: String,
    },

    #[error("confirmation denied")]
    ConfirmationDenied,

    /// No answer within the confirmation timeout. Treated as a denial.
    #[error("confirmation timed out after {0:?}")]
    ConfirmationTimeout(Duration),

    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// Some recorded steps have no inverse and no partial rollback was asked for.
    #[error("transaction {id} is not reversible: steps {steps:?} have no inverse")]
    NotReversible {
        id: TransactionId,
        steps: Vec<usize>,
    },

    #[error("transaction {0} is not sealed")]
    NotSealed(TransactionId),

    #[error("transaction {0} has no steps to roll back")]
    NothingToRollBack(TransactionId),

    /// The store could not durably record. Fatal.
    #[error("transaction store failure: {0}")]
    Store(#[from] StoreError),

    #[error("lock error: {0}")]
    Lock(#[from] std::io::Error),
}

impl CoordinatorError {
    /// Errors after which the coordinator must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoordinatorError::Store(err) if !matches!(err, StoreError::NotFound(_)))
    }
}

fn rule_name(rule: &Option<RuleId>) -> &'static str {
    rule.map(|r| r.as_str()).unwrap_or("unspecified")
}

impl From<crate::locks::LockError> for CoordinatorError {
    fn from(err: crate::locks::LockError) -> Self {
        match err {
            crate::locks::LockError::Timeout(key) => CoordinatorError::LockTimeout(key),
            crate::locks::LockError::Io(e) => CoordinatorError::Lock(e),
        }
    }
}
