//! Program-name allowlist.

use crate::error::ValidationError;
use crate::invocation::Invocation;
use std::collections::HashSet;
use std::path::Path;

const SYSTEM_BIN_DIRS: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Only recognized package managers and supporting binaries may run.
pub struct ProgramAllowlist {
    programs: HashSet<String>,
}

impl ProgramAllowlist {
    pub fn new(programs: &[String]) -> Self {
        Self {
            programs: programs.iter().cloned().collect(),
        }
    }

    /// A bare name matches by name. A path matches when listed verbatim, or
    /// when it lives in a system binary directory under a listed name; a
    /// listed name anywhere else is a different binary.
    pub fn validate(&self, invocation: &Invocation<'_>) -> Result<(), ValidationError> {
        let program = invocation.program;
        let allowed = if self.programs.contains(program) {
            true
        } else if program.contains('/') {
            let in_system_dir = Path::new(program)
                .parent()
                .and_then(Path::to_str)
                .is_some_and(|dir| SYSTEM_BIN_DIRS.contains(&dir));
            in_system_dir && self.programs.contains(invocation.program_name())
        } else {
            false
        };

        if allowed {
            Ok(())
        } else {
            Err(ValidationError::program_not_allowed(program))
        }
    }
}
