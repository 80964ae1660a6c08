//! Main validator that composes the structural, allowlist, denylist and path
//! confinement rules.
//!
//! Rules are evaluated per step in a fixed precedence order:
//!
//! 1. **Structure** - program present, no unresolved placeholders
//! 2. **Allowlist** - the program (after peeling a permitted `sudo`) is known.
//!    Wrapper options and nested wrappers are refused while peeling.
//! 3. **Denylist** - destructive and escalation patterns
//! 4. **Path confinement** - every path argument and the working directory.
//!    Package-manager state paths count only for the package managers.
//! 5. **Effect consistency** - package effects match the command
//!
//! The first denial wins. A denied step ends validation for the whole plan.

use crate::allowlist::ProgramAllowlist;
use crate::denylist::Denylist;
use crate::error::{PolicyConfigError, ValidationError};
use crate::invocation::Invocation;
use crate::paths::PathConfinement;
use crate::structure::{validate_effect, validate_materialized};
use cortex_core::{Plan, PlanDecision, SecurityConfig, SecurityDecision, Step, Verdict};
use std::collections::HashSet;

/// Programs that may name package-manager state paths as arguments or
/// working directory. Everything else is confined to the allowed directories.
const PACKAGE_STATE_PROGRAMS: &[&str] = &[
    "apt-get", "apt", "apt-cache", "dpkg", "dnf", "yum", "rpm", "pip", "pip3",
];

/// Validates plans against the security configuration.
///
/// Pure over configuration, plan and the filesystem's symlink layout: the
/// same inputs always yield the same decisions, so stored plans can be
/// re-audited.
pub struct SecurityValidator {
    wrappers: Vec<String>,
    allowlist: ProgramAllowlist,
    denylist: Denylist,
    /// Allowed directories only: write targets, and every path of programs
    /// other than the package managers.
    confinement: PathConfinement,
    /// Allowed directories plus package-manager state.
    package_confinement: PathConfinement,
    confirm_programs: HashSet<String>,
    confirm_subcommands: HashSet<String>,
}

impl SecurityValidator {
    pub fn new(config: &SecurityConfig) -> Result<Self, PolicyConfigError> {
        Ok(Self {
            wrappers: config.privilege_wrappers.clone(),
            allowlist: ProgramAllowlist::new(&config.allowed_programs),
            denylist: Denylist::new(&config.system_roots, &config.deny_patterns)?,
            confinement: PathConfinement::new(&config.allowed_dirs),
            package_confinement: PathConfinement::new(
                config
                    .allowed_dirs
                    .iter()
                    .chain(&config.package_state_paths),
            ),
            confirm_programs: config.confirm_programs.iter().cloned().collect(),
            confirm_subcommands: config.confirm_subcommands.iter().cloned().collect(),
        })
    }

    /// Validate every step of `plan`.
    ///
    /// Stops at the first denied step; the returned decisions then end with
    /// that denial.
    pub fn validate(&self, plan: &Plan) -> PlanDecision {
        if plan.is_empty() {
            tracing::warn!(plan_id = %plan.plan_id, "Rejecting empty plan");
            return PlanDecision {
                decisions: vec![ValidationError::empty_plan().into_decision(0)],
            };
        }

        let mut decisions = Vec::with_capacity(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            let decision = self.validate_step(index, step);
            let denied = decision.verdict == Verdict::Deny;
            decisions.push(decision);
            if denied {
                break;
            }
        }
        PlanDecision { decisions }
    }

    /// Decision for a single step.
    pub fn validate_step(&self, index: usize, step: &Step) -> SecurityDecision {
        match self.check_step(step) {
            Ok(None) => {
                tracing::debug!(step = index, command = %step.command, "Step allowed");
                SecurityDecision::allow(index)
            }
            Ok(Some(reason)) => {
                tracing::debug!(
                    step = index,
                    command = %step.command,
                    reason = %reason,
                    "Step requires confirmation"
                );
                SecurityDecision::confirm(index, reason)
            }
            Err(err) => {
                tracing::warn!(
                    step = index,
                    command = %step.command,
                    rule = %err.rule(),
                    "Step denied: {}",
                    err.message
                );
                err.into_decision(index)
            }
        }
    }

    /// `Ok(Some(reason))` when the step is permitted but needs confirmation.
    fn check_step(&self, step: &Step) -> Result<Option<String>, ValidationError> {
        validate_materialized(&step.command)?;

        let invocation = Invocation::parse(&step.command, &self.wrappers)?;
        self.allowlist.validate(&invocation)?;
        self.denylist
            .validate(&invocation, &step.working_dir, &self.confinement)?;
        self.confinement_for(&invocation)
            .validate(&invocation, &step.working_dir)?;
        validate_effect(&step.effect, &invocation)?;

        Ok(self.confirmation_reason(step, &invocation))
    }

    fn confinement_for(&self, invocation: &Invocation<'_>) -> &PathConfinement {
        if PACKAGE_STATE_PROGRAMS.contains(&invocation.program_name()) {
            &self.package_confinement
        } else {
            &self.confinement
        }
    }

    fn confirmation_reason(&self, step: &Step, invocation: &Invocation<'_>) -> Option<String> {
        if step.requires_confirmation {
            return Some(format!("step is marked destructive: {}", step.effect));
        }
        let program = invocation.program_name();
        if self.confirm_programs.contains(program) {
            return Some(format!("'{}' requires confirmation", program));
        }
        if let Some(sub) = invocation.subcommand()
            && self.confirm_subcommands.contains(sub)
        {
            return Some(format!("'{} {}' removes software", program, sub));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{CommandSpec, Effect, PackageManager, RuleId};
    use std::path::PathBuf;

    fn validator() -> SecurityValidator {
        SecurityValidator::new(&SecurityConfig::default()).unwrap()
    }

    fn command_step(program: &str, args: &[&str]) -> Step {
        Step::new(
            CommandSpec::new(program, args.iter().copied()),
            "/tmp",
            Effect::Command {
                summary: "test".to_string(),
            },
        )
    }

    #[test]
    fn package_install_is_allowed() {
        let plan = Plan::new(
            "install nginx",
            "nginx",
            vec![
                PackageManager::Apt.refresh_step("/tmp", Some("sudo")).unwrap(),
                PackageManager::Apt.install_step("nginx", "/tmp", Some("sudo")),
            ],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.verdict(), Verdict::Allow);
        assert_eq!(decision.decisions.len(), 2);
    }

    #[test]
    fn rm_rf_root_is_a_destructive_pattern() {
        let plan = Plan::new("wipe", "wipe", vec![command_step("rm", &["-rf", "/"])]);
        let decision = validator().validate(&plan);
        let denial = decision.denial().unwrap();
        assert_eq!(denial.rule, Some(RuleId::DestructivePattern));
        assert_eq!(denial.step_index, 0);
    }

    #[test]
    fn unknown_program_is_denied_by_allowlist() {
        let plan = Plan::new("x", "x", vec![command_step("bash", &["-c", "id"])]);
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::ProgramAllowlist));
    }

    #[test]
    fn denial_rejects_the_whole_plan() {
        let plan = Plan::new(
            "mixed",
            "mixed",
            vec![
                PackageManager::Apt.install_step("curl", "/tmp", None),
                command_step("cp", &["/tmp/a", "/etc/passwd"]),
                PackageManager::Apt.install_step("nginx", "/tmp", None),
            ],
        );
        let decision = validator().validate(&plan);
        assert!(decision.is_denied());
        assert_eq!(decision.decisions.len(), 2);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PathConfinement));
    }

    #[test]
    fn removal_requires_confirmation() {
        let plan = Plan::new(
            "remove nginx",
            "nginx",
            vec![PackageManager::Apt.remove_step("nginx", "/tmp", Some("sudo"))],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.verdict(), Verdict::Confirm);
        assert_eq!(decision.confirmations().count(), 1);
    }

    #[test]
    fn step_marker_requires_confirmation() {
        let step = PackageManager::Pip
            .install_step("requests", "/tmp", None)
            .requiring_confirmation();
        let plan = Plan::new("pip", "requests", vec![step]);
        assert_eq!(validator().validate(&plan).verdict(), Verdict::Confirm);
    }

    #[test]
    fn empty_plan_is_denied() {
        let plan = Plan::new("nothing", "nothing", Vec::new());
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::EmptyPlan));
    }

    #[test]
    fn working_dir_outside_allowed_is_denied() {
        let mut step = PackageManager::Apt.install_step("nginx", "/tmp", None);
        step.working_dir = PathBuf::from("/root");
        let plan = Plan::new("install nginx", "nginx", vec![step]);
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PathConfinement));
    }

    #[test]
    fn validation_is_deterministic() {
        let plan = Plan::new(
            "install",
            "nginx",
            vec![
                PackageManager::Apt.install_step("nginx", "/tmp", Some("sudo")),
                command_step("rm", &["-rf", "/usr"]),
            ],
        );
        let v = validator();
        assert_eq!(v.validate(&plan), v.validate(&plan));
    }

    #[test]
    fn package_manager_hooks_are_denied() {
        let plan = Plan::new(
            "hook",
            "hook",
            vec![command_step(
                "sudo",
                &["apt-get", "-o", "APT::Update::Pre-Invoke::=id", "update"],
            )],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PrivilegeEscalation));

        let plan = Plan::new(
            "untar",
            "untar",
            vec![command_step(
                "tar",
                &["-xf", "/tmp/a.tar", "--checkpoint=1", "--checkpoint-action=exec=id"],
            )],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PrivilegeEscalation));
    }

    #[test]
    fn only_package_managers_touch_package_state() {
        let plan = Plan::new(
            "status",
            "status",
            vec![command_step(
                "sudo",
                &["curl", "-o", "/var/lib/dpkg/status", "https://example.com/x"],
            )],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::DestructivePattern));

        let plan = Plan::new(
            "repo",
            "repo",
            vec![command_step(
                "sudo",
                &["cp", "/tmp/evil.list", "/etc/apt/sources.list.d/evil.list"],
            )],
        );
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PathConfinement));

        let plan = Plan::new(
            "local deb",
            "local deb",
            vec![command_step(
                "dpkg",
                &["-i", "/var/cache/apt/archives/nginx.deb"],
            )],
        );
        assert!(!validator().validate(&plan).is_denied());
    }

    #[test]
    fn escalation_through_sudo_shell_is_denied() {
        let plan = Plan::new("root", "root", vec![command_step("sudo", &["-s"])]);
        let decision = validator().validate(&plan);
        assert_eq!(decision.denial().unwrap().rule, Some(RuleId::PrivilegeEscalation));
    }
}
