//! Validation error types for the security gate.
//!
//! Every denial is a [`ValidationError`] carrying a [`ValidationErrorKind`].
//! The kind maps onto the stable [`RuleId`] recorded in the step's decision.

use cortex_core::{RuleId, SecurityDecision};
use std::fmt;
use std::path::Path;

/// Error type for validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The kind of validation error.
    pub kind: ValidationErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rule identifier recorded for this denial.
    pub fn rule(&self) -> RuleId {
        self.kind.rule()
    }

    /// Decision for the step at `step_index`.
    pub fn into_decision(self, step_index: usize) -> SecurityDecision {
        SecurityDecision::deny(step_index, self.rule(), self.message)
    }

    // =========================================================================
    // STRUCTURAL ERRORS
    // =========================================================================

    pub fn empty_plan() -> Self {
        Self::new(ValidationErrorKind::EmptyPlan, "Plan has no steps")
    }

    pub fn empty_program() -> Self {
        Self::new(
            ValidationErrorKind::EmptyProgram,
            "Step has an empty program name",
        )
    }

    pub fn placeholder(token: &str) -> Self {
        Self::new(
            ValidationErrorKind::Placeholder,
            format!("Token '{}' contains an unresolved placeholder", token),
        )
    }

    pub fn control_character(token: &str) -> Self {
        Self::new(
            ValidationErrorKind::ControlCharacter,
            format!("Token {:?} contains a control character", token),
        )
    }

    pub fn effect_mismatch(effect: &str, program: &str) -> Self {
        Self::new(
            ValidationErrorKind::EffectMismatch,
            format!(
                "Declared effect '{}' does not match command program '{}'",
                effect, program
            ),
        )
    }

    // =========================================================================
    // ALLOWLIST ERRORS
    // =========================================================================

    pub fn program_not_allowed(program: &str) -> Self {
        Self::new(
            ValidationErrorKind::ProgramNotAllowed,
            format!("Program '{}' is not on the allowlist", program),
        )
    }

    pub fn wrapper_without_program(wrapper: &str) -> Self {
        Self::new(
            ValidationErrorKind::ProgramNotAllowed,
            format!("'{}' is not followed by a program", wrapper),
        )
    }

    // =========================================================================
    // DENYLIST ERRORS
    // =========================================================================

    pub fn wrapper_option(wrapper: &str, option: &str) -> Self {
        Self::new(
            ValidationErrorKind::PrivilegeEscalation,
            format!("Option '{}' to '{}' is not permitted", option, wrapper),
        )
    }

    pub fn nested_wrapper(outer: &str, inner: &str) -> Self {
        Self::new(
            ValidationErrorKind::PrivilegeEscalation,
            format!("Privilege escalation chain '{} {}'", outer, inner),
        )
    }

    pub fn identity_switch(program: &str) -> Self {
        Self::new(
            ValidationErrorKind::PrivilegeEscalation,
            format!("'{}' switches user identity", program),
        )
    }

    pub fn command_hook(program: &str, option: &str) -> Self {
        Self::new(
            ValidationErrorKind::CommandHook,
            format!(
                "Option '{}' lets '{}' run an arbitrary command or load its configuration",
                option, program
            ),
        )
    }

    pub fn recursive_root_deletion(program: &str, target: &Path) -> Self {
        Self::new(
            ValidationErrorKind::RecursiveRootDeletion,
            format!(
                "Recursive '{}' of system root '{}'",
                program,
                target.display()
            ),
        )
    }

    pub fn no_preserve_root() -> Self {
        Self::new(
            ValidationErrorKind::RecursiveRootDeletion,
            "'--no-preserve-root' disables root protection",
        )
    }

    pub fn raw_device_write(target: &str) -> Self {
        Self::new(
            ValidationErrorKind::RawDeviceWrite,
            format!("Raw write to device '{}'", target),
        )
    }

    pub fn filesystem_format(program: &str) -> Self {
        Self::new(
            ValidationErrorKind::FilesystemFormat,
            format!("'{}' formats or wipes block devices", program),
        )
    }

    pub fn write_target_outside(flag: &str, target: &Path) -> Self {
        Self::new(
            ValidationErrorKind::WriteTargetOutside,
            format!(
                "Write target '{}' for '{}' is outside the allowed directories",
                target.display(),
                flag
            ),
        )
    }

    pub fn pattern_denied(id: &str, arg: &str) -> Self {
        Self::new(
            ValidationErrorKind::PatternDenied,
            format!("Argument '{}' matches deny pattern '{}'", arg, id),
        )
    }

    // =========================================================================
    // PATH CONFINEMENT ERRORS
    // =========================================================================

    pub fn path_outside(arg: &str, resolved: &Path) -> Self {
        Self::new(
            ValidationErrorKind::PathOutsideAllowed,
            format!(
                "Path '{}' resolves to '{}', outside the allowed directories",
                arg,
                resolved.display()
            ),
        )
    }

    pub fn working_dir_outside(resolved: &Path) -> Self {
        Self::new(
            ValidationErrorKind::WorkingDirOutsideAllowed,
            format!(
                "Working directory '{}' is outside the allowed directories",
                resolved.display()
            ),
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule(), self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Categories of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    // =========================================================================
    // Structural
    // =========================================================================
    EmptyPlan,
    EmptyProgram,
    /// Template placeholder left in a token.
    Placeholder,
    ControlCharacter,
    /// Install/remove/refresh effect on a command that cannot produce it.
    EffectMismatch,

    // =========================================================================
    // Allowlist
    // =========================================================================
    ProgramNotAllowed,

    // =========================================================================
    // Denylist
    // =========================================================================
    PrivilegeEscalation,
    /// Option that makes an allowed program run a command of the caller's choosing.
    CommandHook,
    RecursiveRootDeletion,
    RawDeviceWrite,
    FilesystemFormat,
    /// Output/prefix/root flag pointing outside the allowed directories.
    /// Package-manager state paths do not count as allowed here.
    WriteTargetOutside,
    /// Matched a configured deny pattern.
    PatternDenied,

    // =========================================================================
    // Path confinement
    // =========================================================================
    PathOutsideAllowed,
    WorkingDirOutsideAllowed,
}

impl ValidationErrorKind {
    pub fn rule(&self) -> RuleId {
        match self {
            ValidationErrorKind::EmptyPlan => RuleId::EmptyPlan,
            ValidationErrorKind::EmptyProgram
            | ValidationErrorKind::Placeholder
            | ValidationErrorKind::ControlCharacter => RuleId::Unmaterialized,
            ValidationErrorKind::EffectMismatch => RuleId::EffectMismatch,
            ValidationErrorKind::ProgramNotAllowed => RuleId::ProgramAllowlist,
            ValidationErrorKind::PrivilegeEscalation | ValidationErrorKind::CommandHook => {
                RuleId::PrivilegeEscalation
            }
            ValidationErrorKind::RecursiveRootDeletion
            | ValidationErrorKind::RawDeviceWrite
            | ValidationErrorKind::FilesystemFormat
            | ValidationErrorKind::WriteTargetOutside
            | ValidationErrorKind::PatternDenied => RuleId::DestructivePattern,
            ValidationErrorKind::PathOutsideAllowed
            | ValidationErrorKind::WorkingDirOutsideAllowed => RuleId::PathConfinement,
        }
    }
}

/// Error building a validator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("invalid deny pattern '{id}': {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },
}
