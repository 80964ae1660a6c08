//! Inverse-step mapping, applied when a step is recorded.
//!
//! The mapping depends only on the step's declared effect and on the
//! package-manager capability set (install, remove), never on which manager
//! is involved.

use cortex_core::{Effect, Inverse, PackageManager, Step, StepStatus};

/// Compute the inverse of `step` given how it ended.
///
/// Steps that failed before doing anything (non-zero exit, sandbox failure)
/// have nothing to undo. Steps that may have taken effect (success, timeout,
/// unconfirmed success) are undone by the opposite package operation.
pub fn compute_inverse(step: &Step, status: &StepStatus) -> Inverse {
    let may_have_taken_effect = matches!(
        status,
        StepStatus::Succeeded | StepStatus::ExecutionTimeout | StepStatus::VerificationMismatch
    );
    if !may_have_taken_effect {
        return Inverse::NotNeeded {
            reason: format!("step did not take effect ({})", status),
        };
    }

    let wrapper = wrapper_of(step);
    match &step.effect {
        Effect::Install { manager, package } => Inverse::Reversible {
            step: manager.remove_step(package, &step.working_dir, wrapper),
        },
        Effect::Remove { manager, package } => Inverse::Reversible {
            step: manager.install_step(package, &step.working_dir, wrapper),
        },
        Effect::Refresh { .. } => Inverse::NotNeeded {
            reason: "index refresh leaves nothing to undo".to_string(),
        },
        Effect::Command { summary } => Inverse::NotReversible {
            reason: format!("no known inverse for '{}' ({})", step.command, summary),
        },
    }
}

/// The privilege wrapper the original step ran under, so the inverse runs
/// with the same privileges.
fn wrapper_of(step: &Step) -> Option<&str> {
    let program = step.command.program.as_str();
    match PackageManager::for_program(program) {
        Some(_) => None,
        None => Some(program),
    }
}
