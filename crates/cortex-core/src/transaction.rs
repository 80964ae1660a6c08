//! Execution, verification and transaction records.

use crate::{Plan, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// How the sandboxed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The process ran to completion; see `exit_code`.
    Exited,
    /// The wall-clock limit elapsed and the process group was killed.
    TimedOut,
    /// The sandbox could not be set up or the process could not be spawned.
    SandboxFailure,
}

/// Per-step execution outcome. Produced for every executed step, on success
/// and on failure alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub sandbox_id: Uuid,
    pub outcome: ExecutionOutcome,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    pub duration_ms: u64,
    /// Number of launch attempts, including the automatic retry.
    #[serde(default = "one")]
    pub attempts: u32,
    /// Sandbox or spawn error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn one() -> u32 {
    1
}

impl ExecutionResult {
    /// Result for a step whose sandbox never produced a running process.
    pub fn sandbox_failure(sandbox_id: Uuid, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            sandbox_id,
            outcome: ExecutionOutcome::SandboxFailure,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 0,
            attempts,
            error: Some(error.into()),
        }
    }

    /// Exited with one of the step's expected exit codes.
    pub fn exited_as_expected(&self, step: &Step) -> bool {
        self.outcome == ExecutionOutcome::Exited
            && self.exit_code.is_some_and(|code| step.expects_exit_code(code))
    }
}

/// Independent post-check of a step's declared effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the observed system state matches the step's claim.
    pub expected_state: bool,
    /// What was actually observed.
    pub observed: String,
    /// False when no observation was attempted (the step already failed).
    #[serde(default = "yes")]
    pub checked: bool,
}

fn yes() -> bool {
    true
}

impl VerificationResult {
    pub fn observed(expected_state: bool, observed: impl Into<String>) -> Self {
        Self {
            expected_state,
            observed: observed.into(),
            checked: true,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            expected_state: false,
            observed: reason.into(),
            checked: false,
        }
    }
}

/// Classification of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Unexpected exit code.
    ExecutionFailure { exit_code: Option<i32> },
    ExecutionTimeout,
    SandboxFailure,
    /// Exit code said success; the independent check disagreed.
    VerificationMismatch,
}

impl StepStatus {
    pub fn classify(
        step: &Step,
        execution: &ExecutionResult,
        verification: &VerificationResult,
    ) -> Self {
        match execution.outcome {
            ExecutionOutcome::TimedOut => StepStatus::ExecutionTimeout,
            ExecutionOutcome::SandboxFailure => StepStatus::SandboxFailure,
            ExecutionOutcome::Exited if !execution.exited_as_expected(step) => {
                StepStatus::ExecutionFailure {
                    exit_code: execution.exit_code,
                }
            }
            ExecutionOutcome::Exited if !verification.expected_state => {
                StepStatus::VerificationMismatch
            }
            ExecutionOutcome::Exited => StepStatus::Succeeded,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }

    /// Soft failures are unconfirmed successes, not known-bad state.
    pub fn is_soft_failure(&self) -> bool {
        matches!(self, StepStatus::VerificationMismatch)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::ExecutionFailure {
                exit_code: Some(code),
            } => write!(f, "execution failure (exit {})", code),
            StepStatus::ExecutionFailure { exit_code: None } => {
                write!(f, "execution failure (killed by signal)")
            }
            StepStatus::ExecutionTimeout => write!(f, "execution timeout"),
            StepStatus::SandboxFailure => write!(f, "sandbox failure"),
            StepStatus::VerificationMismatch => write!(f, "verification mismatch"),
        }
    }
}

/// The operation that undoes a recorded step, computed when the step is
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inverse {
    /// Running `step` undoes the recorded effect.
    Reversible { step: Step },
    /// Nothing to undo: the step left no effect behind.
    NotNeeded { reason: String },
    /// The step took effect and no inverse is known.
    NotReversible { reason: String },
}

impl Inverse {
    pub fn step(&self) -> Option<&Step> {
        match self {
            Inverse::Reversible { step } => Some(step),
            _ => None,
        }
    }

    pub fn is_reversible(&self) -> bool {
        !matches!(self, Inverse::NotReversible { .. })
    }
}

/// One recorded step of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub step: Step,
    pub execution: ExecutionResult,
    pub verification: VerificationResult,
    pub status: StepStatus,
    pub inverse: Inverse,
    pub recorded_at: DateTime<Utc>,
}

/// Overall status of a sealed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    PartiallyFailed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    /// Status for a plan that halted before its last step.
    pub fn halted(succeeded_steps: usize) -> Self {
        if succeeded_steps > 0 {
            TransactionStatus::PartiallyFailed
        } else {
            TransactionStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::PartiallyFailed => "partially_failed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "completed" => Ok(TransactionStatus::Completed),
            "partially_failed" | "partial" => Ok(TransactionStatus::PartiallyFailed),
            "failed" => Ok(TransactionStatus::Failed),
            "rolled_back" => Ok(TransactionStatus::RolledBack),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// Durable record of one plan's execution.
///
/// `status` is `None` until the transaction is sealed. `rolled_back_by` is
/// never persisted on the record itself; the store derives it from later
/// rollback transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub plan: Plan,
    pub steps: Vec<StepRecord>,
    pub status: Option<TransactionStatus>,
    pub started_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<TransactionId>,
}

impl Transaction {
    pub fn is_sealed(&self) -> bool {
        self.status.is_some()
    }

    /// Sealed status, or `RolledBack` once a completed rollback references
    /// this transaction.
    pub fn effective_status(&self) -> Option<TransactionStatus> {
        match (self.status, self.rolled_back_by) {
            (Some(_), Some(_)) => Some(TransactionStatus::RolledBack),
            (status, _) => status,
        }
    }

    pub fn succeeded_steps(&self) -> usize {
        self.steps.iter().filter(|r| r.status.is_success()).count()
    }

    /// Number of leading steps that were verified as succeeded.
    pub fn verified_prefix(&self) -> usize {
        self.steps
            .iter()
            .take_while(|r| r.status.is_success())
            .count()
    }

    /// Recorded steps with no known inverse.
    pub fn non_reversible_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|r| !r.inverse.is_reversible())
    }

    pub fn is_fully_reversible(&self) -> bool {
        self.non_reversible_steps().next().is_none()
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            target: self.plan.target.clone(),
            request: self.plan.request.clone(),
            status: self.effective_status(),
            started_at: self.started_at,
            sealed_at: self.sealed_at,
            step_count: self.plan.steps.len(),
            recorded_steps: self.steps.len(),
            succeeded_steps: self.succeeded_steps(),
            reversible: self.is_fully_reversible(),
            rollback_of: self.plan.rollback_of,
            rolled_back_by: self.rolled_back_by,
        }
    }
}

/// Listing view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub target: String,
    pub request: String,
    /// `None` for a transaction that was never sealed (crashed mid-plan).
    pub status: Option<TransactionStatus>,
    pub started_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub step_count: usize,
    pub recorded_steps: usize,
    pub succeeded_steps: usize,
    pub reversible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<TransactionId>,
}

/// Filter for listing transactions. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub target: Option<String>,
    pub status: Option<TransactionStatus>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, summary: &TransactionSummary) -> bool {
        if let Some(target) = &self.target
            && &summary.target != target
        {
            return false;
        }
        if let Some(status) = self.status
            && summary.status != Some(status)
        {
            return false;
        }
        true
    }
}
