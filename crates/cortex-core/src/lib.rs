//! Shared plan model for Cortex.
//!
//! Every other crate speaks in these types: a [`Plan`] is an ordered list of
//! [`Step`]s, the validator answers with [`SecurityDecision`]s, the executor
//! produces [`ExecutionResult`]s, the verifier [`VerificationResult`]s, and the
//! history store folds all of it into [`Transaction`]s.
//!
//! The types carry no behavior beyond small helpers; control flow lives in
//! `cortex-runtime`.

pub mod config;
pub mod decision;
pub mod package;
pub mod transaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub use config::{
    ConfigError, ConfirmationConfig, CortexConfig, DenyPattern, HistoryConfig, InstallConfig,
    Isolation, PlannerConfig, PlannerKind, SandboxConfig, SecurityConfig, StackDefinition,
};
pub use decision::{PlanDecision, RuleId, SecurityDecision, Verdict};
pub use package::PackageManager;
pub use transaction::{
    ExecutionOutcome, ExecutionResult, Inverse, StepRecord, StepStatus, Transaction,
    TransactionFilter, TransactionId, TransactionStatus, TransactionSummary, VerificationResult,
};

/// A program and its argument list.
///
/// Never a raw shell string: the executor hands `program` and `args` to the
/// OS directly, so no argument is ever re-parsed by a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Prefix this command with a privilege wrapper such as `sudo`.
    pub fn wrapped(self, wrapper: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: wrapper.to_string(),
            args,
        }
    }

    /// All tokens in order, program first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

impl fmt::Display for CommandSpec {
    /// Display-only rendering with minimal quoting. Never fed to a shell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.tokens().map(quote_for_display).collect();
        write!(f, "{}", rendered.join(" "))
    }
}

fn quote_for_display(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// What a step claims to do to the system.
///
/// The verifier observes this claim independently, and the history store
/// derives the inverse step from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Install `package` via `manager`.
    Install {
        manager: PackageManager,
        package: String,
    },
    /// Remove `package` via `manager`.
    Remove {
        manager: PackageManager,
        package: String,
    },
    /// Refresh the manager's package index. Leaves nothing to undo.
    Refresh { manager: PackageManager },
    /// Any other command. Cannot be observed or inverted.
    Command { summary: String },
}

impl Effect {
    pub fn package(&self) -> Option<&str> {
        match self {
            Effect::Install { package, .. } | Effect::Remove { package, .. } => Some(package),
            _ => None,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Install { manager, package } => {
                write!(f, "install package {} via {}", package, manager)
            }
            Effect::Remove { manager, package } => {
                write!(f, "remove package {} via {}", package, manager)
            }
            Effect::Refresh { manager } => write!(f, "refresh {} package index", manager),
            Effect::Command { summary } => write!(f, "{}", summary),
        }
    }
}

/// One atomic shell-level operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub command: CommandSpec,
    pub working_dir: PathBuf,
    pub effect: Effect,
    #[serde(default = "default_expected_exit_codes")]
    pub expected_exit_codes: Vec<i32>,
    /// Safe to run twice; allows one automatic retry on sandbox setup failure.
    #[serde(default)]
    pub idempotent: bool,
    /// Destructive-but-permitted; the validator turns allow into confirm.
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl Step {
    pub fn new(command: CommandSpec, working_dir: impl Into<PathBuf>, effect: Effect) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            effect,
            expected_exit_codes: default_expected_exit_codes(),
            idempotent: false,
            requires_confirmation: false,
        }
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn expects_exit_code(&self, code: i32) -> bool {
        self.expected_exit_codes.contains(&code)
    }
}

fn default_expected_exit_codes() -> Vec<i32> {
    vec![0]
}

/// Ordered sequence of steps produced for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    /// Originating request text, kept verbatim for the history view.
    pub request: String,
    /// Software identifier the plan targets; the unit of per-target locking.
    pub target: String,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    /// Set on rollback plans: the transaction being reverted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<TransactionId>,
}

impl Plan {
    pub fn new(request: impl Into<String>, target: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            request: request.into(),
            target: target.into(),
            steps,
            created_at: Utc::now(),
            rollback_of: None,
        }
    }

    /// A plan that reverts `original`.
    pub fn rollback(original: &Transaction, steps: Vec<Step>) -> Self {
        let mut plan = Self::new(
            format!("rollback {}", original.id),
            original.plan.target.clone(),
            steps,
        );
        plan.rollback_of = Some(original.id);
        plan
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
