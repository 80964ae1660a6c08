//! `cortex history list|show|audit`

use super::{Context, parse_id, print_plan, print_step_record};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Local, Utc};
use cortex_core::{Inverse, Transaction, TransactionFilter, TransactionStatus};
use cortex_history::TransactionStore;

pub async fn list(
    ctx: &Context,
    limit: Option<usize>,
    status: Option<TransactionStatus>,
    target: Option<String>,
) -> Result<()> {
    let store = ctx.open_store()?;
    let mut filter = TransactionFilter::new().limit(ctx.history_limit(limit));
    if let Some(status) = status {
        filter = filter.status(status);
    }
    if let Some(target) = target {
        filter = filter.target(target);
    }

    let summaries = store.list(&filter).await?;
    if summaries.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<19}  {:<16}  {:<5}  REQUEST",
        "ID", "STARTED", "STATUS", "STEPS"
    );
    for summary in summaries {
        let status = summary
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "open".to_string());
        println!(
            "{:<36}  {:<19}  {:<16}  {:<5}  {}",
            summary.id,
            local_time(summary.started_at),
            status,
            format!("{}/{}", summary.succeeded_steps, summary.step_count),
            truncate(&summary.request, 50)
        );
    }
    Ok(())
}

pub async fn show(ctx: &Context, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let store = ctx.open_store()?;
    let txn = store.get(id).await?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&txn).context("Failed to serialize transaction")?;
        println!("{}", rendered);
        return Ok(());
    }

    print_header(&txn);
    println!("\nSteps ({} of {} recorded):", txn.steps.len(), txn.plan.steps.len());
    for record in &txn.steps {
        print_step_record(record);
        match &record.inverse {
            Inverse::Reversible { step } => println!("       undo: {}", step.command),
            Inverse::NotNeeded { reason } => println!("       undo: not needed ({})", reason),
            Inverse::NotReversible { reason } => println!("       undo: NOT REVERSIBLE ({})", reason),
        }
    }
    for step in txn.plan.steps.iter().skip(txn.steps.len()) {
        println!("  - {}  [not run]", step.command);
    }

    print_rollback_availability(&txn);
    Ok(())
}

pub async fn audit(ctx: &Context, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    // Audit only reads; never prompt.
    let coordinator = ctx.coordinator(false)?;
    let (txn, decision) = coordinator.audit(id).await?;

    println!("Re-validating plan of transaction {}\n", txn.id);
    print_plan(&txn.plan, &decision);
    println!("\nVerdict under current configuration: {}", decision.verdict());
    if let Some(denial) = decision.denial() {
        let rule = denial.rule.map(|r| r.as_str()).unwrap_or("unspecified");
        println!(
            "✗ Step {} would now be denied [{}]: {}",
            denial.step_index + 1,
            rule,
            denial.justification
        );
    }
    Ok(())
}

fn print_header(txn: &Transaction) {
    let status = txn
        .effective_status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "open (never sealed)".to_string());
    println!("Transaction {}", txn.id);
    println!("  request:  {}", txn.plan.request);
    println!("  target:   {}", txn.plan.target);
    println!("  status:   {}", status);
    println!("  started:  {}", local_time(txn.started_at));
    if let Some(sealed) = txn.sealed_at {
        println!("  sealed:   {}", local_time(sealed));
    }
    if let Some(original) = txn.plan.rollback_of {
        println!("  reverts:  {}", original);
    }
    if let Some(by) = txn.rolled_back_by {
        println!("  reverted by: {}", by);
    }
}

fn print_rollback_availability(txn: &Transaction) {
    println!();
    if !txn.is_sealed() {
        println!("Rollback: unavailable (transaction not sealed)");
        return;
    }
    let undoable = txn.steps.iter().filter(|r| r.inverse.step().is_some()).count();
    let blocked: Vec<String> = txn
        .non_reversible_steps()
        .map(|r| (r.index + 1).to_string())
        .collect();
    match (undoable, blocked.is_empty()) {
        (0, _) => println!("Rollback: nothing to undo"),
        (_, true) => println!("Rollback: available (cortex rollback {})", txn.id),
        (_, false) => println!(
            "Rollback: partial only; step(s) {} have no inverse (cortex rollback {} --allow-partial)",
            blocked.join(", "),
            txn.id
        ),
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }
}
