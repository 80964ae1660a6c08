//! Security validator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rules the security validator applies to every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Programs that may appear as a step's command.
    #[serde(default = "default_allowed_programs")]
    pub allowed_programs: Vec<String>,

    /// Privilege wrappers that are unwrapped before the allowlist check.
    #[serde(default = "default_privilege_wrappers")]
    pub privilege_wrappers: Vec<String>,

    /// Directories that path arguments may resolve into.
    #[serde(default = "default_allowed_dirs")]
    pub allowed_dirs: Vec<PathBuf>,

    /// Package-manager state locations, always permitted.
    #[serde(default = "default_package_state_paths")]
    pub package_state_paths: Vec<PathBuf>,

    /// Programs whose steps always need explicit confirmation.
    #[serde(default = "default_confirm_programs")]
    pub confirm_programs: Vec<String>,

    /// Package-manager subcommands that need explicit confirmation.
    #[serde(default = "default_confirm_subcommands")]
    pub confirm_subcommands: Vec<String>,

    /// Directories whose recursive deletion or ownership change is denied.
    #[serde(default = "default_system_roots")]
    pub system_roots: Vec<PathBuf>,

    /// Extra argument patterns to deny.
    #[serde(default)]
    pub deny_patterns: Vec<DenyPattern>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_programs: default_allowed_programs(),
            privilege_wrappers: default_privilege_wrappers(),
            allowed_dirs: default_allowed_dirs(),
            package_state_paths: default_package_state_paths(),
            confirm_programs: default_confirm_programs(),
            confirm_subcommands: default_confirm_subcommands(),
            system_roots: default_system_roots(),
            deny_patterns: Vec::new(),
        }
    }
}

/// A configured argument denial.
///
/// `pattern` is a regular expression matched against each argument; when
/// `program` is set the rule applies to that program only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyPattern {
    pub id: String,
    #[serde(default)]
    pub program: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

fn default_allowed_programs() -> Vec<String> {
    strings(&[
        "apt-get", "apt", "dnf", "yum", "pip3", "pip", "dpkg", "rpm", "systemctl", "mkdir", "rm",
        "cp", "tar", "curl", "wget",
    ])
}

fn default_privilege_wrappers() -> Vec<String> {
    strings(&["sudo"])
}

fn default_allowed_dirs() -> Vec<PathBuf> {
    paths(&["/tmp"])
}

fn default_package_state_paths() -> Vec<PathBuf> {
    paths(&[
        "/var/lib/dpkg",
        "/var/lib/apt",
        "/var/cache/apt",
        "/var/lib/rpm",
        "/var/cache/dnf",
        "/var/cache/yum",
        "/etc/apt/sources.list.d",
    ])
}

fn default_confirm_programs() -> Vec<String> {
    strings(&["rm", "systemctl"])
}

fn default_confirm_subcommands() -> Vec<String> {
    strings(&["remove", "purge", "autoremove", "erase", "uninstall"])
}

fn default_system_roots() -> Vec<PathBuf> {
    paths(&[
        "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
        "/sbin", "/srv", "/sys", "/usr", "/var",
    ])
}
