//! Argument-pattern denylist.
//!
//! These rules deny regardless of allowlist membership: an allowlisted `rm`
//! still may not delete `/`, and an allowlisted `apt-get` may not be handed
//! a hook (`-o APT::Update::Pre-Invoke::=...`) that runs through a shell.

use crate::error::{PolicyConfigError, ValidationError};
use crate::invocation::{Invocation, is_identity_switcher};
use crate::paths::{PathConfinement, normalize, resolve, resolve_arg};
use cortex_core::DenyPattern;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Programs whose recursive mode on a system root is fatal.
const RECURSIVE_PROGRAMS: &[&str] = &["rm", "chmod", "chown", "chgrp"];

/// Programs that format, wipe or repartition block devices.
const DEVICE_PROGRAMS: &[&str] = &[
    "wipefs",
    "mkswap",
    "fdisk",
    "sfdisk",
    "parted",
    "shred",
    "blkdiscard",
];

/// Flags whose value is a location the program writes into.
const WRITE_TARGET_FLAGS: &[&str] = &[
    "-o",
    "--output",
    "-O",
    "--output-document",
    "--prefix",
    "--root",
    "--target",
    "--installroot",
    "-C",
    "--directory",
];

/// Options through which an allowed program runs a command of the caller's
/// choosing, or loads configuration that can.
struct HookOptions {
    programs: &'static [&'static str],
    options: &'static [&'static str],
    /// Complete option names that merely look like abbreviations of a
    /// denied one.
    exact: &'static [&'static str],
}

const COMMAND_HOOKS: &[HookOptions] = &[
    HookOptions {
        programs: &["apt-get", "apt", "apt-cache"],
        options: &["-o", "--option", "-c", "--config-file"],
        exact: &[],
    },
    HookOptions {
        programs: &["dnf", "yum"],
        options: &["--setopt", "-c", "--config", "--pluginpath"],
        exact: &[],
    },
    HookOptions {
        programs: &["dpkg"],
        options: &["--pre-invoke", "--post-invoke", "--status-logger"],
        exact: &[],
    },
    HookOptions {
        programs: &["rpm"],
        options: &["-D", "--define", "-E", "--eval", "--macros", "--rcfile", "--pipe"],
        exact: &[],
    },
    HookOptions {
        programs: &["tar"],
        options: &[
            "--checkpoint-action",
            "--to-command",
            "-I",
            "--use-compress-program",
            "--rsh-command",
            "-F",
            "--info-script",
            "--new-volume-script",
        ],
        exact: &["--checkpoint"],
    },
    HookOptions {
        programs: &["curl"],
        options: &["-K", "--config"],
        exact: &[],
    },
    HookOptions {
        programs: &["wget"],
        options: &["-e", "--execute", "--config", "--use-askpass"],
        exact: &[],
    },
];

struct CompiledPattern {
    id: String,
    program: Option<String>,
    regex: Regex,
}

/// Destructive and escalation patterns.
pub struct Denylist {
    system_roots: Vec<PathBuf>,
    patterns: Vec<CompiledPattern>,
}

impl Denylist {
    pub fn new(system_roots: &[PathBuf], patterns: &[DenyPattern]) -> Result<Self, PolicyConfigError> {
        let mut roots = Vec::new();
        for root in system_roots {
            let lexical = normalize(root);
            let resolved = resolve(&lexical);
            roots.push(lexical);
            if !roots.contains(&resolved) {
                roots.push(resolved);
            }
        }

        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|regex| CompiledPattern {
                        id: p.id.clone(),
                        program: p.program.clone(),
                        regex,
                    })
                    .map_err(|source| PolicyConfigError::InvalidPattern {
                        id: p.id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            system_roots: roots,
            patterns,
        })
    }

    pub fn validate(
        &self,
        invocation: &Invocation<'_>,
        working_dir: &Path,
        confinement: &PathConfinement,
    ) -> Result<(), ValidationError> {
        let program = invocation.program_name();

        if is_identity_switcher(program) {
            return Err(ValidationError::identity_switch(program));
        }
        if invocation.args.iter().any(|a| a == "--no-preserve-root") {
            return Err(ValidationError::no_preserve_root());
        }
        if program.starts_with("mkfs") || DEVICE_PROGRAMS.contains(&program) {
            return Err(ValidationError::filesystem_format(program));
        }

        check_command_hooks(invocation)?;
        self.check_recursive_roots(invocation, working_dir)?;
        check_write_targets(invocation, working_dir, confinement)?;
        self.check_patterns(invocation)?;
        Ok(())
    }

    fn check_recursive_roots(
        &self,
        invocation: &Invocation<'_>,
        working_dir: &Path,
    ) -> Result<(), ValidationError> {
        let program = invocation.program_name();
        if !RECURSIVE_PROGRAMS.contains(&program) {
            return Ok(());
        }
        if !invocation.args.iter().any(|a| is_recursive_flag(a)) {
            return Ok(());
        }

        for arg in invocation.args.iter().filter(|a| !a.starts_with('-')) {
            // No shell expands globs, but `rm -rf /*` is never what anyone
            // meant to allow.
            let target = arg.trim_end_matches('*');
            let target = if target.is_empty() { "." } else { target };
            let lexical = normalize(&working_dir.join(target));
            let resolved = resolve_arg(target, working_dir);
            if self.is_system_root(&lexical) || self.is_system_root(&resolved) {
                return Err(ValidationError::recursive_root_deletion(program, &resolved));
            }
        }
        Ok(())
    }

    fn is_system_root(&self, path: &Path) -> bool {
        self.system_roots.iter().any(|root| root == path)
    }

    fn check_patterns(&self, invocation: &Invocation<'_>) -> Result<(), ValidationError> {
        let program = invocation.program_name();
        for pattern in &self.patterns {
            if let Some(only) = &pattern.program
                && only != program
            {
                continue;
            }
            if let Some(arg) = invocation.args.iter().find(|a| pattern.regex.is_match(a)) {
                return Err(ValidationError::pattern_denied(&pattern.id, arg));
            }
        }
        Ok(())
    }
}

/// `-r`, `-R`, `--recursive`, or a short-option cluster containing either.
fn is_recursive_flag(arg: &str) -> bool {
    if arg == "--recursive" {
        return true;
    }
    match arg.strip_prefix('-') {
        Some(cluster) if !cluster.starts_with('-') => {
            cluster.chars().all(|c| c.is_ascii_alphabetic()) && cluster.contains(['r', 'R'])
        }
        _ => false,
    }
}

fn check_command_hooks(invocation: &Invocation<'_>) -> Result<(), ValidationError> {
    let program = invocation.program_name();
    let Some(hooks) = COMMAND_HOOKS.iter().find(|h| h.programs.contains(&program)) else {
        return Ok(());
    };

    for (i, arg) in invocation.args.iter().enumerate() {
        if arg == "--" {
            break;
        }
        // `tar xIf zstd a.tar`: a leading bundle without a dash is options.
        let cluster = if let Some(rest) = arg.strip_prefix('-') {
            (!rest.starts_with('-')).then_some(rest)
        } else if i == 0 && program == "tar" {
            Some(arg.as_str())
        } else {
            None
        };

        let denied = match cluster {
            Some(cluster) => short_option_hook(cluster, hooks),
            None => long_option_hook(arg, hooks),
        };
        if denied {
            return Err(ValidationError::command_hook(program, arg));
        }
    }
    Ok(())
}

/// Any denied letter in a short-option bundle (`-xIzstd`, `-oFoo=bar`).
fn short_option_hook(cluster: &str, hooks: &HookOptions) -> bool {
    cluster
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .any(|c| {
            hooks
                .options
                .iter()
                .any(|o| o.len() == 2 && o.ends_with(c))
        })
}

/// `--name` or `--name=value`, including unambiguous abbreviations, which
/// getopt-style parsers accept.
fn long_option_hook(arg: &str, hooks: &HookOptions) -> bool {
    let Some(body) = arg.strip_prefix("--") else {
        return false;
    };
    let name = body.split_once('=').map_or(body, |(name, _)| name);
    if name.len() < 2 {
        return false;
    }
    let given = format!("--{}", name);
    if hooks.exact.contains(&given.as_str()) {
        return false;
    }
    hooks
        .options
        .iter()
        .any(|o| o.starts_with("--") && o.starts_with(given.as_str()))
}

fn check_write_targets(
    invocation: &Invocation<'_>,
    working_dir: &Path,
    confinement: &PathConfinement,
) -> Result<(), ValidationError> {
    let args = invocation.args;
    for (i, arg) in args.iter().enumerate() {
        let target = if let Some(value) = arg.strip_prefix("of=") {
            Some(("of", value))
        } else if let Some((flag, value)) = arg.split_once('=')
            && WRITE_TARGET_FLAGS.contains(&flag)
        {
            Some((flag, value))
        } else if WRITE_TARGET_FLAGS.contains(&arg.as_str()) {
            args.get(i + 1).map(|v| (arg.as_str(), v.as_str()))
        } else {
            None
        };

        let Some((flag, value)) = target else {
            continue;
        };
        if value.contains("://") {
            continue;
        }
        if value.starts_with("/dev/") && value != "/dev/null" {
            return Err(ValidationError::raw_device_write(value));
        }
        if let Err(resolved) = confinement.check(value, working_dir) {
            return Err(ValidationError::write_target_outside(flag, &resolved));
        }
    }
    Ok(())
}
