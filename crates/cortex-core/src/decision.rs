//! Security verdicts produced by the validation gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict for a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
    Confirm,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "allow"),
            Verdict::Deny => write!(f, "deny"),
            Verdict::Confirm => write!(f, "confirm"),
        }
    }
}

/// Identifier of the rule that produced a non-allow verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    /// The plan has no steps.
    EmptyPlan,
    /// A step still carries a template placeholder or an empty program.
    Unmaterialized,
    /// The declared effect does not match the command.
    EffectMismatch,
    /// The program is not on the allowlist.
    ProgramAllowlist,
    /// Privilege-escalation chaining (nested wrappers, root shells).
    PrivilegeEscalation,
    /// An argument matches a destructive pattern.
    DestructivePattern,
    /// A path argument resolves outside the allowed directories.
    PathConfinement,
    /// Permitted, but the step is destructive and needs explicit approval.
    ConfirmationRequired,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::EmptyPlan => "empty-plan",
            RuleId::Unmaterialized => "unmaterialized",
            RuleId::EffectMismatch => "effect-mismatch",
            RuleId::ProgramAllowlist => "program-allowlist",
            RuleId::PrivilegeEscalation => "privilege-escalation",
            RuleId::DestructivePattern => "destructive-pattern",
            RuleId::PathConfinement => "path-confinement",
            RuleId::ConfirmationRequired => "confirmation-required",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDecision {
    /// Position of the step in the plan.
    pub step_index: usize,
    pub verdict: Verdict,
    /// Set when the verdict is deny or confirm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleId>,
    pub justification: String,
}

impl SecurityDecision {
    pub fn allow(step_index: usize) -> Self {
        Self {
            step_index,
            verdict: Verdict::Allow,
            rule: None,
            justification: "no rule matched".to_string(),
        }
    }

    pub fn deny(step_index: usize, rule: RuleId, justification: impl Into<String>) -> Self {
        Self {
            step_index,
            verdict: Verdict::Deny,
            rule: Some(rule),
            justification: justification.into(),
        }
    }

    pub fn confirm(step_index: usize, justification: impl Into<String>) -> Self {
        Self {
            step_index,
            verdict: Verdict::Confirm,
            rule: Some(RuleId::ConfirmationRequired),
            justification: justification.into(),
        }
    }
}

/// Decisions for a whole plan.
///
/// Validation stops at the first denied step, so a denied plan holds the
/// decisions up to and including that step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub decisions: Vec<SecurityDecision>,
}

impl PlanDecision {
    /// The denial that rejected the plan, if any.
    pub fn denial(&self) -> Option<&SecurityDecision> {
        self.decisions.iter().find(|d| d.verdict == Verdict::Deny)
    }

    pub fn is_denied(&self) -> bool {
        self.denial().is_some()
    }

    pub fn requires_confirmation(&self) -> bool {
        self.decisions.iter().any(|d| d.verdict == Verdict::Confirm)
    }

    /// Steps that need an explicit approval before execution.
    pub fn confirmations(&self) -> impl Iterator<Item = &SecurityDecision> {
        self.decisions
            .iter()
            .filter(|d| d.verdict == Verdict::Confirm)
    }

    /// Overall verdict: deny beats confirm beats allow.
    pub fn verdict(&self) -> Verdict {
        if self.is_denied() {
            Verdict::Deny
        } else if self.requires_confirmation() {
            Verdict::Confirm
        } else {
            Verdict::Allow
        }
    }
}
