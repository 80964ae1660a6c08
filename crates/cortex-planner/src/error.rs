//! Planner errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    /// The request text was refused before any planning.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),

    #[error("unknown stack '{0}'")]
    UnknownStack(String),

    /// No planner is configured.
    #[error("planner not configured: {0}")]
    NotConfigured(String),

    /// The request parsed but describes nothing to install.
    #[error("cannot plan request: {0}")]
    Unplannable(String),

    /// The external planner exited unsuccessfully or printed garbage.
    #[error("external planner failed: {0}")]
    External(String),

    #[error("external planner timed out after {0:?}")]
    Timeout(Duration),

    /// Planner output does not match the plan schema.
    #[error("planner output rejected by schema: {0}")]
    Schema(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
