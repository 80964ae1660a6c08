//! Package-manager backends.
//!
//! Each backend exposes the same capability set: check-installed, install,
//! remove. The inverse mapping in the history store only ever goes through
//! these capabilities, never through manager identity.

use crate::{CommandSpec, Effect, Step};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pip,
}

impl PackageManager {
    pub const ALL: [PackageManager; 4] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Pip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pip => "pip",
        }
    }

    /// Binary used for install and remove.
    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pip => "pip3",
        }
    }

    /// Every program name this manager answers to.
    pub fn programs(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &["apt-get", "apt"],
            PackageManager::Dnf => &["dnf"],
            PackageManager::Yum => &["yum"],
            PackageManager::Pip => &["pip3", "pip"],
        }
    }

    /// Manager driven by `program`, if any.
    pub fn for_program(program: &str) -> Option<Self> {
        let name = program.rsplit('/').next().unwrap_or(program);
        Self::ALL
            .into_iter()
            .find(|m| m.programs().contains(&name))
    }

    /// System managers write to root-owned state.
    pub fn needs_root(&self) -> bool {
        !matches!(self, PackageManager::Pip)
    }

    pub fn install_command(&self, package: &str) -> CommandSpec {
        match self {
            PackageManager::Pip => CommandSpec::new(self.program(), ["install", package]),
            _ => CommandSpec::new(self.program(), ["install", "-y", package]),
        }
    }

    pub fn remove_command(&self, package: &str) -> CommandSpec {
        match self {
            PackageManager::Pip => CommandSpec::new(self.program(), ["uninstall", "-y", package]),
            _ => CommandSpec::new(self.program(), ["remove", "-y", package]),
        }
    }

    /// Index refresh, for managers that keep one.
    pub fn refresh_command(&self) -> Option<CommandSpec> {
        match self {
            PackageManager::Apt => Some(CommandSpec::new("apt-get", ["update"])),
            PackageManager::Dnf => Some(CommandSpec::new("dnf", ["makecache"])),
            PackageManager::Yum => Some(CommandSpec::new("yum", ["makecache"])),
            PackageManager::Pip => None,
        }
    }

    /// Read-only query of the installed state of `package`.
    pub fn query_command(&self, package: &str) -> CommandSpec {
        match self {
            PackageManager::Apt => {
                CommandSpec::new("dpkg-query", ["-W", "-f=${Status}", package])
            }
            PackageManager::Dnf | PackageManager::Yum => CommandSpec::new("rpm", ["-q", package]),
            PackageManager::Pip => CommandSpec::new("pip3", ["show", package]),
        }
    }

    /// Interpret the output of [`query_command`](Self::query_command).
    pub fn parse_installed(&self, exit_code: i32, stdout: &str) -> bool {
        match self {
            PackageManager::Apt => exit_code == 0 && stdout.contains("install ok installed"),
            _ => exit_code == 0,
        }
    }

    pub fn install_step(
        &self,
        package: &str,
        working_dir: impl Into<PathBuf>,
        wrapper: Option<&str>,
    ) -> Step {
        let command = self.wrap(self.install_command(package), wrapper);
        Step::new(
            command,
            working_dir,
            Effect::Install {
                manager: *self,
                package: package.to_string(),
            },
        )
        .idempotent(true)
    }

    pub fn remove_step(
        &self,
        package: &str,
        working_dir: impl Into<PathBuf>,
        wrapper: Option<&str>,
    ) -> Step {
        let command = self.wrap(self.remove_command(package), wrapper);
        Step::new(
            command,
            working_dir,
            Effect::Remove {
                manager: *self,
                package: package.to_string(),
            },
        )
        .idempotent(true)
    }

    pub fn refresh_step(
        &self,
        working_dir: impl Into<PathBuf>,
        wrapper: Option<&str>,
    ) -> Option<Step> {
        let command = self.wrap(self.refresh_command()?, wrapper);
        Some(Step::new(command, working_dir, Effect::Refresh { manager: *self }).idempotent(true))
    }

    fn wrap(&self, command: CommandSpec, wrapper: Option<&str>) -> CommandSpec {
        match wrapper {
            Some(w) if self.needs_root() => command.wrapped(w),
            _ => command,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PackageManager {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apt" | "apt-get" => Ok(PackageManager::Apt),
            "dnf" => Ok(PackageManager::Dnf),
            "yum" => Ok(PackageManager::Yum),
            "pip" | "pip3" => Ok(PackageManager::Pip),
            other => Err(format!(
                "unknown package manager '{}' (expected apt, dnf, yum or pip)",
                other
            )),
        }
    }
}
