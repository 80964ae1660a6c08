//! Structural checks: the step must be fully materialized and its declared
//! effect must be something the command can actually produce.

use crate::error::ValidationError;
use crate::invocation::Invocation;
use cortex_core::{CommandSpec, Effect};

/// Rejects empty programs, leftover template placeholders and control
/// characters.
pub fn validate_materialized(command: &CommandSpec) -> Result<(), ValidationError> {
    if command.program.trim().is_empty() {
        return Err(ValidationError::empty_program());
    }
    for token in command.tokens() {
        if token.contains("{{") || token.contains("}}") || token.contains("${") {
            return Err(ValidationError::placeholder(token));
        }
        if has_angle_placeholder(token) {
            return Err(ValidationError::placeholder(token));
        }
        if token.chars().any(char::is_control) {
            return Err(ValidationError::control_character(token));
        }
    }
    Ok(())
}

/// `<PACKAGE>`-style markers: an uppercase identifier between angle brackets.
fn has_angle_placeholder(token: &str) -> bool {
    token.split('<').skip(1).any(|rest| {
        let Some((inner, _)) = rest.split_once('>') else {
            return false;
        };
        inner.starts_with(|c: char| c.is_ascii_uppercase())
            && inner
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
    })
}

const INSTALL_SUBCOMMANDS: &[&str] = &["install"];
const REMOVE_SUBCOMMANDS: &[&str] = &["remove", "purge", "erase", "uninstall"];
const REFRESH_SUBCOMMANDS: &[&str] = &["update", "makecache"];

/// Package effects must be carried by the matching manager, subcommand and
/// package.
pub fn validate_effect(
    effect: &Effect,
    invocation: &Invocation<'_>,
) -> Result<(), ValidationError> {
    let (manager, subcommands, package) = match effect {
        Effect::Install { manager, package } => (manager, INSTALL_SUBCOMMANDS, Some(package)),
        Effect::Remove { manager, package } => (manager, REMOVE_SUBCOMMANDS, Some(package)),
        Effect::Refresh { manager } => (manager, REFRESH_SUBCOMMANDS, None),
        Effect::Command { .. } => return Ok(()),
    };

    let program = invocation.program_name();
    let mismatch = || ValidationError::effect_mismatch(&effect.to_string(), program);

    if !manager.programs().contains(&program) {
        return Err(mismatch());
    }
    match invocation.subcommand() {
        Some(sub) if subcommands.contains(&sub) => {}
        _ => return Err(mismatch()),
    }
    if let Some(package) = package
        && !invocation.args.iter().any(|a| a == package)
    {
        return Err(mismatch());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationErrorKind;
    use cortex_core::PackageManager;

    #[test]
    fn placeholders_are_rejected() {
        for token in ["{{package}}", "${PKG}", "<PACKAGE>"] {
            let cmd = CommandSpec::new("apt-get", ["install", token]);
            let err = validate_materialized(&cmd).unwrap_err();
            assert_eq!(err.kind, ValidationErrorKind::Placeholder, "{token}");
        }
    }

    #[test]
    fn lowercase_angle_brackets_are_not_placeholders() {
        let cmd = CommandSpec::new("pip3", ["install", "requests<3"]);
        assert!(validate_materialized(&cmd).is_ok());
    }

    #[test]
    fn empty_program_is_rejected() {
        let cmd = CommandSpec::new("  ", ["install"]);
        let err = validate_materialized(&cmd).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::EmptyProgram);
    }

    #[test]
    fn effect_must_match_command() {
        let step = PackageManager::Apt.install_step("nginx", "/tmp", Some("sudo"));
        let wrappers = vec!["sudo".to_string()];
        let inv = Invocation::parse(&step.command, &wrappers).unwrap();
        assert!(validate_effect(&step.effect, &inv).is_ok());

        let cmd = CommandSpec::new("rm", ["-rf", "/tmp/x"]);
        let inv = Invocation::parse(&cmd, &wrappers).unwrap();
        let err = validate_effect(&step.effect, &inv).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::EffectMismatch);
    }

    #[test]
    fn install_effect_must_name_the_package() {
        let effect = Effect::Install {
            manager: PackageManager::Apt,
            package: "nginx".to_string(),
        };
        let cmd = CommandSpec::new("apt-get", ["install", "-y", "apache2"]);
        let inv = Invocation::parse(&cmd, &[]).unwrap();
        assert!(validate_effect(&effect, &inv).is_err());
    }
}
