//! Install defaults and package stacks.

use crate::PackageManager;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_manager")]
    pub default_manager: PackageManager,

    /// Prefix system package-manager commands with `sudo`.
    #[serde(default)]
    pub use_sudo: bool,

    /// Refresh the package index before installing.
    #[serde(default = "default_true")]
    pub refresh_index: bool,

    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Skip the verified leading steps of the target's latest partially
    /// failed transaction when the same target is installed again.
    #[serde(default)]
    pub resume_partial: bool,

    /// How long to wait for a per-target lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            default_manager: default_manager(),
            use_sudo: false,
            refresh_index: true,
            working_dir: default_working_dir(),
            resume_partial: false,
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl InstallConfig {
    pub fn wrapper(&self) -> Option<&'static str> {
        self.use_sudo.then_some("sudo")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// A named bundle of packages installed together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub packages: Vec<String>,
    /// Overrides the default manager for this stack.
    #[serde(default)]
    pub manager: Option<PackageManager>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub(crate) fn default_stacks() -> Vec<StackDefinition> {
    vec![
        StackDefinition {
            id: "web".to_string(),
            name: "Web server".to_string(),
            description: "Reverse proxy with TLS tooling".to_string(),
            packages: vec!["nginx".to_string(), "certbot".to_string()],
            manager: None,
            tags: vec!["web".to_string(), "tls".to_string()],
        },
        StackDefinition {
            id: "python-dev".to_string(),
            name: "Python development".to_string(),
            description: "Interpreter, headers and virtualenv support".to_string(),
            packages: vec![
                "python3".to_string(),
                "python3-dev".to_string(),
                "python3-venv".to_string(),
            ],
            manager: None,
            tags: vec!["python".to_string()],
        },
        StackDefinition {
            id: "build".to_string(),
            name: "Build essentials".to_string(),
            description: "Compilers and build tools".to_string(),
            packages: vec![
                "build-essential".to_string(),
                "cmake".to_string(),
                "pkg-config".to_string(),
            ],
            manager: None,
            tags: vec!["c".to_string(), "build".to_string()],
        },
    ]
}

fn default_manager() -> PackageManager {
    PackageManager::Apt
}

fn default_true() -> bool {
    true
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_lock_timeout_secs() -> u64 {
    600
}
