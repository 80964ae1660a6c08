//! Error types for the transaction store.

use cortex_core::{TransactionId, TransactionStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Any error from `begin`, `record_step` or `seal` means the record did not
/// reach disk; callers must treat it as a durability failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No transaction with this id.
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// The transaction is sealed and can no longer change.
    #[error("transaction {0} is already sealed")]
    AlreadySealed(TransactionId),

    /// More step records than the plan has steps.
    #[error("transaction {id} has no step left to record (plan has {plan_steps})")]
    StepOverflow { id: TransactionId, plan_steps: usize },

    /// Status that can only be derived, never sealed directly.
    #[error("cannot seal transaction {id} as {status}")]
    InvalidSeal {
        id: TransactionId,
        status: TransactionStatus,
    },

    /// A record file could not be parsed.
    #[error("corrupt transaction record {path}:{line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Lock acquisition failed.
    #[error("lock error: {0}")]
    Lock(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
