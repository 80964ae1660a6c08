//! CLI command implementations.

pub mod check;
pub mod history;
pub mod install;
pub mod rollback;
pub mod stack;

use anyhow::{Context as _, Result};
use cortex_core::{
    CortexConfig, Plan, PlanDecision, StepRecord, TransactionId, TransactionStatus, Verdict,
};
use cortex_history::{FileTransactionStore, TransactionStore};
use cortex_policy::SecurityValidator;
use cortex_runtime::{
    AbortHandle, AutoApprove, AutoDeny, ConfirmationChannel, Coordinator, CoordinatorError,
    CoordinatorSettings, RunReport, SandboxedExecutor, SystemProbe, TargetLocks, TerminalPrompt,
};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for one package-state query during verification.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub execute: bool,
    pub assume_yes: bool,
}

/// Loaded configuration plus lazily built collaborators.
pub struct Context {
    pub config: CortexConfig,
}

impl Context {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = CortexConfig::load(path).context("Failed to load configuration")?;
        tracing::debug!(home = %config.home.display(), "Configuration loaded");
        Ok(Self { config })
    }

    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.config.history.list_limit)
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    pub fn open_store(&self) -> Result<Arc<FileTransactionStore>> {
        let dir = self.config.history_dir();
        let store = FileTransactionStore::open(&dir)
            .with_context(|| format!("Failed to open transaction store at {}", dir.display()))?;
        Ok(Arc::new(store))
    }

    pub fn validator(&self) -> Result<SecurityValidator> {
        SecurityValidator::new(&self.config.security).context("Invalid security configuration")
    }

    pub fn coordinator(&self, assume_yes: bool) -> Result<Coordinator> {
        let confirmations: Arc<dyn ConfirmationChannel> = if assume_yes {
            Arc::new(AutoApprove)
        } else if std::io::stdin().is_terminal() {
            Arc::new(TerminalPrompt)
        } else {
            Arc::new(AutoDeny)
        };
        let sandbox = self.config.effective_sandbox();
        let probe = Arc::new(SystemProbe::new(sandbox.search_path.clone(), PROBE_TIMEOUT));
        let store: Arc<dyn TransactionStore> = self.open_store()?;

        Ok(Coordinator::new(
            self.validator()?,
            Arc::new(SandboxedExecutor::new()),
            probe,
            store,
            confirmations,
            TargetLocks::new(self.config.history_dir().join("locks")),
            CoordinatorSettings::from_config(&self.config),
        ))
    }
}

pub fn parse_id(id: &str) -> Result<TransactionId> {
    id.parse::<TransactionId>()
        .with_context(|| format!("'{}' is not a transaction id", id))
}

/// Abort handle tripped by Ctrl-C.
pub fn abort_on_ctrl_c() -> AbortHandle {
    let abort = AbortHandle::new();
    let handle = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠ Abort requested; stopping after the current step.");
            handle.abort();
        }
    });
    abort
}

/// Validate, print, and run `plan` when asked to.
pub async fn submit(ctx: &Context, plan: Plan, options: ExecuteOptions) -> Result<()> {
    let coordinator = ctx.coordinator(options.assume_yes)?;
    let decision = coordinator.preview(&plan);
    print_plan(&plan, &decision);

    if let Some(denial) = decision.denial() {
        anyhow::bail!(
            "Plan denied at step {}: {}",
            denial.step_index + 1,
            denial.justification
        );
    }
    if !options.execute {
        println!("\nPlan only. Re-run with --execute to apply it.");
        return Ok(());
    }

    let abort = abort_on_ctrl_c();
    let report = coordinator
        .run(plan, &abort)
        .await
        .map_err(explain_coordinator_error)?;
    print_report(&report);
    match report.status() {
        TransactionStatus::Completed => Ok(()),
        status => anyhow::bail!("Transaction {} ended as {}", report.transaction.id, status),
    }
}

pub fn explain_coordinator_error(err: CoordinatorError) -> anyhow::Error {
    let hint = match &err {
        CoordinatorError::ConfirmationDenied | CoordinatorError::ConfirmationTimeout(_) => {
            Some("Nothing was executed.")
        }
        CoordinatorError::Store(_) if err.is_fatal() => {
            Some("Execution stopped; the transaction may be left unsealed.")
        }
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::anyhow!("{}. {}", err, hint),
        None => err.into(),
    }
}

pub fn print_plan(plan: &Plan, decision: &PlanDecision) {
    let label = if plan.is_rollback() { "Rollback plan" } else { "Plan" };
    println!(
        "{} for '{}' ({} step{})",
        label,
        plan.target,
        plan.steps.len(),
        if plan.steps.len() == 1 { "" } else { "s" }
    );
    for (index, step) in plan.steps.iter().enumerate() {
        let verdict = match decision.decisions.get(index) {
            Some(d) if d.verdict == Verdict::Allow => "allow".to_string(),
            Some(d) => format!("{}: {}", d.verdict, d.justification),
            None => "not validated".to_string(),
        };
        println!("  {}. {}", index + 1, step.command);
        println!("       {} [{}]", step.effect, verdict);
    }
}

pub fn print_report(report: &RunReport) {
    let txn = &report.transaction;
    let status = report.status();
    let icon = if status == TransactionStatus::Completed { "✓" } else { "✗" };
    println!();
    if let Some(from) = report.resumed_from {
        println!(
            "Resumed from {}; skipped {} verified step(s).",
            from, report.skipped_steps
        );
    }
    println!(
        "{} Transaction {}: {} ({}/{} steps succeeded)",
        icon,
        txn.id,
        status,
        txn.succeeded_steps(),
        txn.plan.steps.len()
    );
    for record in &txn.steps {
        print_step_record(record);
    }
    if report.aborted {
        println!("  Stopped early on user request.");
    }
    if !txn.plan.is_rollback() && txn.steps.iter().any(|r| r.inverse.step().is_some()) {
        println!("\nTo undo: cortex rollback {}", txn.id);
    }
}

pub fn print_step_record(record: &StepRecord) {
    let icon = if record.status.is_success() { "✓" } else { "✗" };
    println!(
        "  {} {}. {}  [{}, {} ms]",
        icon,
        record.index + 1,
        record.step.command,
        record.status,
        record.execution.duration_ms
    );
    if record.verification.checked {
        println!("       observed: {}", record.verification.observed);
    }
    if !record.status.is_success() {
        if let Some(error) = &record.execution.error {
            println!("       error: {}", error);
        }
        let stderr = record.execution.stderr.trim();
        if !stderr.is_empty() {
            for line in tail(stderr, 5) {
                println!("       | {}", line);
            }
        }
    }
}

fn tail(text: &str, lines: usize) -> impl Iterator<Item = &str> {
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    all.into_iter().skip(skip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let lines: Vec<_> = tail("a\nb\nc\nd", 2).collect();
        assert_eq!(lines, vec!["c", "d"]);
        assert_eq!(tail("only", 5).count(), 1);
    }

    #[test]
    fn history_limit_precedence() {
        let mut ctx = Context {
            config: CortexConfig::default(),
        };
        assert_eq!(ctx.history_limit(None), DEFAULT_HISTORY_LIMIT);
        ctx.config.history.list_limit = Some(50);
        assert_eq!(ctx.history_limit(None), 50);
        assert_eq!(ctx.history_limit(Some(3)), 3);
    }

    #[test]
    fn bad_id_is_reported() {
        assert!(parse_id("not-a-uuid").is_err());
    }
}
