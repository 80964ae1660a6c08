//! `cortex check`
//!
//! Looks for configuration and host problems before anything runs:
//! - configuration is internally consistent
//! - security rules compile
//! - planner can be built
//! - transaction store opens
//! - sandbox isolation is usable
//! - stack package names are acceptable

use super::Context;
use anyhow::Result;
use cortex_core::{Isolation, PlannerKind};
use cortex_planner::{planner_from_config, validate_package_name};
use cortex_runtime::bubblewrap_available;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Ok,
    Warning,
    Error,
}

#[derive(Debug)]
struct Finding {
    severity: Severity,
    category: &'static str,
    message: String,
}

impl Finding {
    fn ok(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Ok,
            category,
            message: message.into(),
        }
    }

    fn warning(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            message: message.into(),
        }
    }

    fn error(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            message: message.into(),
        }
    }
}

pub async fn run(ctx: &Context) -> Result<()> {
    println!("Checking Cortex configuration ({})\n", ctx.config.home.display());

    let mut findings = vec![check_config(ctx), check_security(ctx)];
    findings.push(check_planner(ctx));
    findings.push(check_store(ctx));
    findings.push(check_sandbox(ctx));
    findings.extend(check_stacks(ctx));

    for finding in &findings {
        let icon = match finding.severity {
            Severity::Ok => "✓",
            Severity::Warning => "⚠",
            Severity::Error => "✗",
        };
        println!("  {} [{}] {}", icon, finding.category, finding.message);
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    let warnings = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    println!();
    if errors > 0 {
        anyhow::bail!("{} error(s), {} warning(s)", errors, warnings);
    }
    println!("✅ All checks passed! ({} warning(s))", warnings);
    Ok(())
}

fn check_config(ctx: &Context) -> Finding {
    match ctx.config.validate() {
        Ok(()) => Finding::ok("config", "configuration is consistent"),
        Err(e) => Finding::error("config", e.to_string()),
    }
}

fn check_security(ctx: &Context) -> Finding {
    match ctx.validator() {
        Ok(_) => Finding::ok(
            "security",
            format!(
                "{} allowed programs, {} deny patterns",
                ctx.config.security.allowed_programs.len(),
                ctx.config.security.deny_patterns.len()
            ),
        ),
        Err(e) => Finding::error("security", format!("{:#}", e)),
    }
}

fn check_planner(ctx: &Context) -> Finding {
    let planner = &ctx.config.planner;
    match planner_from_config(&ctx.config) {
        Err(e) => Finding::error("planner", e.to_string()),
        Ok(_) => match planner.kind {
            PlannerKind::Literal => Finding::ok("planner", "literal planner"),
            PlannerKind::None => Finding::warning("planner", "planner disabled; installs will be refused"),
            PlannerKind::External => {
                let command = planner
                    .command
                    .as_ref()
                    .map(|c| c.display().to_string())
                    .unwrap_or_default();
                Finding::ok("planner", format!("external planner: {}", command))
            }
        },
    }
}

fn check_store(ctx: &Context) -> Finding {
    match ctx.open_store() {
        Ok(store) => Finding::ok("history", format!("store at {}", store.dir().display())),
        Err(e) => Finding::error("history", format!("{:#}", e)),
    }
}

fn check_sandbox(ctx: &Context) -> Finding {
    let sandbox = ctx.config.effective_sandbox();
    let network = if sandbox.allow_network {
        "network allowed for every step"
    } else if sandbox.package_network {
        "network for install and refresh steps only"
    } else {
        "network disabled"
    };
    match sandbox.isolation {
        Isolation::Host if sandbox.allow_network => Finding::warning(
            "sandbox",
            "host isolation: process group and cleared environment only, network unrestricted",
        ),
        Isolation::Host => Finding::error(
            "sandbox",
            "host isolation cannot withhold network access; steps will be refused",
        ),
        Isolation::Bubblewrap if bubblewrap_available(&sandbox) => {
            Finding::ok("sandbox", format!("bubblewrap, {}", network))
        }
        Isolation::Bubblewrap => Finding::error(
            "sandbox",
            format!("{} not found", sandbox.bwrap_path.display()),
        ),
    }
}

fn check_stacks(ctx: &Context) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stack in &ctx.config.stacks {
        for package in &stack.packages {
            if let Err(e) = validate_package_name(package) {
                findings.push(Finding::error("stacks", format!("stack '{}': {}", stack.id, e)));
            }
        }
    }
    if findings.is_empty() {
        findings.push(Finding::ok(
            "stacks",
            format!("{} stack(s)", ctx.config.stacks.len()),
        ));
    }
    findings
}
