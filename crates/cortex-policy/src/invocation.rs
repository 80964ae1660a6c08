//! The program a step actually runs, with any privilege wrapper peeled off.

use crate::error::ValidationError;
use cortex_core::CommandSpec;

/// Programs that switch user identity on their own.
const IDENTITY_SWITCHERS: &[&str] = &["su", "sudo", "doas", "pkexec", "runuser", "sg"];

/// A command with its privilege wrapper separated from the wrapped program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation<'a> {
    /// The permitted wrapper (`sudo`), if the step used one.
    pub wrapper: Option<&'a str>,
    pub program: &'a str,
    pub args: &'a [String],
}

impl<'a> Invocation<'a> {
    /// Peel a leading permitted wrapper off `command`.
    ///
    /// Wrapper options are refused outright: `-s`, `-i`, `-u` and friends
    /// open root shells or switch identity, and there is no option a plan
    /// legitimately needs. A wrapped identity switcher is an escalation chain.
    pub fn parse(command: &'a CommandSpec, wrappers: &[String]) -> Result<Self, ValidationError> {
        let program = command.program.as_str();
        if !wrappers.iter().any(|w| w == program) {
            return Ok(Self {
                wrapper: None,
                program,
                args: &command.args,
            });
        }

        let Some((inner, rest)) = command.args.split_first() else {
            return Err(ValidationError::wrapper_without_program(program));
        };
        if inner.starts_with('-') {
            return Err(ValidationError::wrapper_option(program, inner));
        }
        if IDENTITY_SWITCHERS.contains(&basename(inner))
            || wrappers.iter().any(|w| w == inner)
        {
            return Err(ValidationError::nested_wrapper(program, inner));
        }

        Ok(Self {
            wrapper: Some(program),
            program: inner,
            args: rest,
        })
    }

    /// Program name without any directory prefix.
    pub fn program_name(&self) -> &'a str {
        basename(self.program)
    }

    /// First argument that is not an option: the subcommand for package
    /// managers and `systemctl`.
    pub fn subcommand(&self) -> Option<&'a str> {
        self.args
            .iter()
            .map(String::as_str)
            .find(|a| !a.starts_with('-'))
    }
}

pub(crate) fn basename(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

pub(crate) fn is_identity_switcher(program: &str) -> bool {
    IDENTITY_SWITCHERS.contains(&basename(program))
}
