//! Plan state machine.
//!
//! ```text
//! Received -> Validated -> [Confirmed] -> Executing -> Completed
//!                                                   -> PartiallyFailed
//!                                                   -> Failed
//! ```
//!
//! Nothing is recorded until a plan is validated, confirmed where needed and
//! holds its target locks. From then on every step is recorded before the
//! next one starts, and the transaction is always sealed unless the store
//! itself fails.

use crate::confirmation::{ConfirmationAnswer, ConfirmationChannel, ConfirmationRequest};
use crate::error::CoordinatorError;
use crate::executor::StepExecutor;
use crate::locks::{TargetLocks, lock_keys};
use crate::probe::InstalledProbe;
use crate::verifier::Verifier;
use cortex_core::{
    CortexConfig, Plan, PlanDecision, SandboxConfig, Transaction, TransactionFilter,
    TransactionId, TransactionStatus,
};
use cortex_history::TransactionStore;
use cortex_policy::SecurityValidator;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Received,
    Validated,
    Confirmed,
    Executing,
    Completed,
    PartiallyFailed,
    Failed,
}

impl From<TransactionStatus> for PlanState {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Completed | TransactionStatus::RolledBack => PlanState::Completed,
            TransactionStatus::PartiallyFailed => PlanState::PartiallyFailed,
            TransactionStatus::Failed => PlanState::Failed,
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanState::Received => "received",
            PlanState::Validated => "validated",
            PlanState::Confirmed => "confirmed",
            PlanState::Executing => "executing",
            PlanState::Completed => "completed",
            PlanState::PartiallyFailed => "partially_failed",
            PlanState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Requests that execution stop after the in-flight step.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub sandbox: SandboxConfig,
    pub confirmation_timeout: Duration,
    pub lock_timeout: Duration,
    pub resume_partial: bool,
}

impl CoordinatorSettings {
    pub fn from_config(config: &CortexConfig) -> Self {
        Self {
            sandbox: config.effective_sandbox(),
            confirmation_timeout: config.confirmation.timeout(),
            lock_timeout: config.install.lock_timeout(),
            resume_partial: config.install.resume_partial,
        }
    }
}

/// Outcome of a plan that reached execution.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The sealed transaction.
    pub transaction: Transaction,
    pub decision: PlanDecision,
    /// Execution stopped early on user request.
    pub aborted: bool,
    /// Partially failed transaction this run continued from.
    pub resumed_from: Option<TransactionId>,
    /// Leading steps skipped because `resumed_from` already verified them.
    pub skipped_steps: usize,
}

impl RunReport {
    pub fn status(&self) -> TransactionStatus {
        self.transaction
            .status
            .unwrap_or(TransactionStatus::Failed)
    }
}

pub struct Coordinator {
    validator: SecurityValidator,
    executor: Arc<dyn StepExecutor>,
    verifier: Verifier,
    store: Arc<dyn TransactionStore>,
    confirmations: Arc<dyn ConfirmationChannel>,
    locks: TargetLocks,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        validator: SecurityValidator,
        executor: Arc<dyn StepExecutor>,
        probe: Arc<dyn InstalledProbe>,
        store: Arc<dyn TransactionStore>,
        confirmations: Arc<dyn ConfirmationChannel>,
        locks: TargetLocks,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            validator,
            executor,
            verifier: Verifier::new(probe),
            store,
            confirmations,
            locks,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Validate without executing or recording anything.
    pub fn preview(&self, plan: &Plan) -> PlanDecision {
        self.validator.validate(plan)
    }

    /// Re-run the validator over a stored plan snapshot.
    pub async fn audit(
        &self,
        id: TransactionId,
    ) -> Result<(Transaction, PlanDecision), CoordinatorError> {
        let txn = self.store.get(id).await?;
        let decision = self.validator.validate(&txn.plan);
        tracing::info!(
            transaction_id = %id,
            verdict = %decision.verdict(),
            "Re-validated stored plan"
        );
        Ok((txn, decision))
    }

    /// Drive `plan` through validation, confirmation and execution.
    ///
    /// Validation and confirmation failures return before any side effect.
    /// Step failures do not return an error: they end in a sealed
    /// transaction with a failure status.
    pub async fn run(&self, plan: Plan, abort: &AbortHandle) -> Result<RunReport, CoordinatorError> {
        log_state(&plan, PlanState::Received);

        let decision = self.validator.validate(&plan);
        if let Some(denial) = decision.denial() {
            tracing::warn!(
                plan_id = %plan.plan_id,
                step = denial.step_index,
                rule = ?denial.rule,
                "Plan denied: {}",
                denial.justification
            );
            return Err(CoordinatorError::ValidationDenied {
                step_index: denial.step_index,
                rule: denial.rule,
                justification: denial.justification.clone(),
            });
        }
        log_state(&plan, PlanState::Validated);

        if decision.requires_confirmation() {
            self.confirm(&plan, &decision).await?;
            log_state(&plan, PlanState::Confirmed);
        }

        let keys = lock_keys(&plan);
        let _guard = self.locks.acquire(&keys, self.settings.lock_timeout).await?;
        tracing::debug!(plan_id = %plan.plan_id, locks = keys.len(), "Target locks held");

        let (plan, resumed_from, skipped_steps) = self.resume(plan).await?;
        let transaction = self.execute(&plan, abort).await?;
        let aborted = abort.is_aborted() && transaction.steps.len() < plan.steps.len();

        Ok(RunReport {
            transaction,
            decision,
            aborted,
            resumed_from,
            skipped_steps,
        })
    }

    async fn confirm(&self, plan: &Plan, decision: &PlanDecision) -> Result<(), CoordinatorError> {
        let request = ConfirmationRequest::for_plan(plan, decision);
        let timeout = self.settings.confirmation_timeout;
        tracing::info!(
            plan_id = %plan.plan_id,
            confirmation_id = %request.id,
            steps = request.items.len(),
            "Awaiting confirmation"
        );
        match tokio::time::timeout(timeout, self.confirmations.confirm(&request)).await {
            Ok(ConfirmationAnswer::Approved) => Ok(()),
            Ok(ConfirmationAnswer::Denied) => {
                tracing::warn!(plan_id = %plan.plan_id, "Confirmation denied");
                Err(CoordinatorError::ConfirmationDenied)
            }
            Err(_) => {
                tracing::warn!(plan_id = %plan.plan_id, ?timeout, "Confirmation timed out");
                Err(CoordinatorError::ConfirmationTimeout(timeout))
            }
        }
    }

    /// With `resume_partial`, skip the leading steps that the target's
    /// latest partially failed transaction already verified, provided the
    /// new plan starts with exactly those steps.
    async fn resume(
        &self,
        plan: Plan,
    ) -> Result<(Plan, Option<TransactionId>, usize), CoordinatorError> {
        if !self.settings.resume_partial || plan.is_rollback() {
            return Ok((plan, None, 0));
        }
        let filter = TransactionFilter::new().target(plan.target.clone()).limit(1);
        let Some(latest) = self.store.list(&filter).await?.into_iter().next() else {
            return Ok((plan, None, 0));
        };
        if latest.status != Some(TransactionStatus::PartiallyFailed) {
            return Ok((plan, None, 0));
        }

        let previous = self.store.get(latest.id).await?;
        let done = previous.verified_prefix();
        let same_prefix = done > 0
            && done < plan.steps.len()
            && previous.plan.steps.get(..done) == plan.steps.get(..done);
        if !same_prefix {
            return Ok((plan, None, 0));
        }

        tracing::info!(
            plan_id = %plan.plan_id,
            resumed_from = %previous.id,
            skipped = done,
            "Resuming partially failed transaction"
        );
        let mut plan = plan;
        plan.steps.drain(..done);
        Ok((plan, Some(previous.id), done))
    }

    async fn execute(&self, plan: &Plan, abort: &AbortHandle) -> Result<Transaction, CoordinatorError> {
        log_state(plan, PlanState::Executing);
        let id = self.store.begin(plan).await.map_err(durability_failure)?;

        let mut succeeded = 0;
        let mut halted = false;
        for (index, step) in plan.steps.iter().enumerate() {
            if abort.is_aborted() {
                tracing::warn!(transaction_id = %id, step = index, "Aborted before step");
                halted = true;
                break;
            }

            tracing::debug!(transaction_id = %id, step = index, command = %step.command, "Executing step");
            let execution = self.executor.execute(step, &self.settings.sandbox).await;
            let verification = self.verifier.verify(step, &execution).await;
            let record = self
                .store
                .record_step(id, execution, verification)
                .await
                .map_err(durability_failure)?;

            if record.status.is_success() {
                succeeded += 1;
                tracing::debug!(transaction_id = %id, step = index, "Step succeeded");
            } else {
                tracing::warn!(
                    transaction_id = %id,
                    step = index,
                    status = %record.status,
                    "Step failed, halting plan"
                );
                halted = true;
                break;
            }
        }

        let status = if halted {
            TransactionStatus::halted(succeeded)
        } else {
            TransactionStatus::Completed
        };
        let txn = self.store.seal(id, status).await.map_err(durability_failure)?;
        log_state(plan, PlanState::from(status));
        Ok(txn)
    }
}

fn durability_failure(err: cortex_history::StoreError) -> CoordinatorError {
    tracing::error!("Transaction store could not record durably: {}", err);
    CoordinatorError::Store(err)
}

fn log_state(plan: &Plan, state: PlanState) {
    tracing::info!(plan_id = %plan.plan_id, target = %plan.target, state = %state, "Plan state");
}
