//! `cortex rollback`

use super::{
    Context, abort_on_ctrl_c, explain_coordinator_error, parse_id, print_plan, print_report,
};
use anyhow::Result;
use cortex_core::TransactionStatus;
use cortex_runtime::RollbackOptions;

pub async fn run(
    ctx: &Context,
    id: &str,
    dry_run: bool,
    allow_partial: bool,
    assume_yes: bool,
) -> Result<()> {
    let id = parse_id(id)?;
    let coordinator = ctx.coordinator(assume_yes)?;
    let options = RollbackOptions { allow_partial };

    let (plan, decision) = coordinator
        .preview_rollback(id, options)
        .await
        .map_err(explain_coordinator_error)?;
    print_plan(&plan, &decision);
    if let Some(denial) = decision.denial() {
        anyhow::bail!(
            "Rollback plan denied at step {}: {}",
            denial.step_index + 1,
            denial.justification
        );
    }
    if dry_run {
        println!("\nDry run. Nothing was executed.");
        return Ok(());
    }

    let abort = abort_on_ctrl_c();
    let report = coordinator
        .rollback(id, options, &abort)
        .await
        .map_err(explain_coordinator_error)?;
    print_report(&report);
    match report.status() {
        TransactionStatus::Completed => {
            println!("\nRolled back {}.", id);
            Ok(())
        }
        status => anyhow::bail!(
            "Rollback transaction {} ended as {}",
            report.transaction.id,
            status
        ),
    }
}
