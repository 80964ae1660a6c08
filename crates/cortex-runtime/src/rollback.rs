//! Rollback of sealed transactions.
//!
//! A rollback is an ordinary plan built from the recorded inverse steps in
//! reverse execution order. It goes through the same validation,
//! confirmation, locking and recording as any other plan, and lands in a
//! new transaction that references the original.

use crate::coordinator::{AbortHandle, Coordinator, RunReport};
use crate::error::CoordinatorError;
use cortex_core::{Plan, PlanDecision, Step, Transaction, TransactionId};

#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOptions {
    /// Reverse what can be reversed and skip steps without an inverse.
    pub allow_partial: bool,
}

/// Build the plan that reverts `original`.
pub fn rollback_plan(original: &Transaction, options: RollbackOptions) -> Result<Plan, CoordinatorError> {
    if !original.is_sealed() {
        return Err(CoordinatorError::NotSealed(original.id));
    }

    let missing: Vec<usize> = original.non_reversible_steps().map(|r| r.index).collect();
    if !missing.is_empty() {
        if !options.allow_partial {
            return Err(CoordinatorError::NotReversible {
                id: original.id,
                steps: missing,
            });
        }
        tracing::warn!(
            transaction_id = %original.id,
            skipped = ?missing,
            "Partial rollback: steps without an inverse are left in place"
        );
    }

    let steps: Vec<Step> = original
        .steps
        .iter()
        .rev()
        .filter_map(|record| record.inverse.step().cloned())
        .collect();
    if steps.is_empty() {
        return Err(CoordinatorError::NothingToRollBack(original.id));
    }
    Ok(Plan::rollback(original, steps))
}

impl Coordinator {
    /// The rollback plan for `id` and its validation decisions, without
    /// executing anything.
    pub async fn preview_rollback(
        &self,
        id: TransactionId,
        options: RollbackOptions,
    ) -> Result<(Plan, PlanDecision), CoordinatorError> {
        let original = self.store().get(id).await?;
        let plan = rollback_plan(&original, options)?;
        let decision = self.preview(&plan);
        Ok((plan, decision))
    }

    /// Revert `id`. Returns the report of the new rollback transaction.
    pub async fn rollback(
        &self,
        id: TransactionId,
        options: RollbackOptions,
        abort: &AbortHandle,
    ) -> Result<RunReport, CoordinatorError> {
        let original = self.store().get(id).await?;
        let plan = rollback_plan(&original, options)?;
        tracing::info!(
            transaction_id = %id,
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            "Rolling back transaction"
        );
        self.run(plan, abort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortex_core::{
        CommandSpec, Effect, ExecutionOutcome, ExecutionResult, Inverse, PackageManager,
        StepRecord, StepStatus, TransactionStatus, VerificationResult,
    };
    use uuid::Uuid;

    fn record(index: usize, step: Step, status: StepStatus, inverse: Inverse) -> StepRecord {
        StepRecord {
            index,
            step,
            execution: ExecutionResult {
                sandbox_id: Uuid::new_v4(),
                outcome: ExecutionOutcome::Exited,
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                duration_ms: 1,
                attempts: 1,
                error: None,
            },
            verification: VerificationResult::observed(true, "ok"),
            status,
            inverse,
            recorded_at: Utc::now(),
        }
    }

    fn transaction(records: Vec<StepRecord>, status: Option<TransactionStatus>) -> Transaction {
        let steps = records.iter().map(|r| r.step.clone()).collect();
        Transaction {
            id: TransactionId::new(),
            plan: Plan::new("install", "pkgs", steps),
            steps: records,
            status,
            started_at: Utc::now(),
            sealed_at: status.map(|_| Utc::now()),
            rolled_back_by: None,
        }
    }

    fn installed(index: usize, package: &str) -> StepRecord {
        let step = PackageManager::Apt.install_step(package, "/tmp", None);
        let undo = PackageManager::Apt.remove_step(package, "/tmp", None);
        record(index, step, StepStatus::Succeeded, Inverse::Reversible { step: undo })
    }

    fn opaque(index: usize) -> StepRecord {
        let step = Step::new(
            CommandSpec::new("mkdir", ["/tmp/x"]),
            "/tmp",
            Effect::Command {
                summary: "mkdir".to_string(),
            },
        );
        record(
            index,
            step,
            StepStatus::Succeeded,
            Inverse::NotReversible {
                reason: "opaque".to_string(),
            },
        )
    }

    #[test]
    fn inverses_run_in_reverse_order() {
        let txn = transaction(
            vec![installed(0, "a"), installed(1, "b")],
            Some(TransactionStatus::Completed),
        );
        let plan = rollback_plan(&txn, RollbackOptions::default()).unwrap();
        let packages: Vec<_> = plan.steps.iter().filter_map(|s| s.effect.package()).collect();
        assert_eq!(packages, vec!["b", "a"]);
        assert_eq!(plan.rollback_of, Some(txn.id));
        assert_eq!(plan.target, "pkgs");
    }

    #[test]
    fn non_reversible_step_blocks_unless_partial() {
        let txn = transaction(
            vec![installed(0, "a"), opaque(1)],
            Some(TransactionStatus::Completed),
        );
        match rollback_plan(&txn, RollbackOptions::default()) {
            Err(CoordinatorError::NotReversible { steps, .. }) => assert_eq!(steps, vec![1]),
            other => panic!("unexpected: {:?}", other),
        }

        let plan = rollback_plan(
            &txn,
            RollbackOptions {
                allow_partial: true,
            },
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn unsealed_transaction_cannot_be_rolled_back() {
        let txn = transaction(vec![installed(0, "a")], None);
        assert!(matches!(
            rollback_plan(&txn, RollbackOptions::default()),
            Err(CoordinatorError::NotSealed(_))
        ));
    }

    #[test]
    fn nothing_to_undo() {
        let step = PackageManager::Apt.install_step("a", "/tmp", None);
        let failed = record(
            0,
            step,
            StepStatus::ExecutionFailure { exit_code: Some(100) },
            Inverse::NotNeeded {
                reason: "failed".to_string(),
            },
        );
        let txn = transaction(vec![failed], Some(TransactionStatus::Failed));
        assert!(matches!(
            rollback_plan(&txn, RollbackOptions::default()),
            Err(CoordinatorError::NothingToRollBack(_))
        ));
    }
}
