//! Sandboxed executor configuration.

use crate::Effect;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Isolation mechanism used to launch step commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Own process group, cleared environment, no filesystem namespace.
    /// Withholds nothing, so it is only accepted together with
    /// `allow_network: true`.
    Host,
    /// `bwrap` with a read-only root and writable allowed paths.
    #[default]
    Bubblewrap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub isolation: Isolation,

    /// Path or name of the bubblewrap binary.
    #[serde(default = "default_bwrap_path")]
    pub bwrap_path: PathBuf,

    /// Hard wall-clock limit per step.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Bytes kept per output stream; the rest is drained and dropped.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Network for every step.
    #[serde(default)]
    pub allow_network: bool,

    /// Network for install and refresh steps, which download packages.
    #[serde(default = "default_true")]
    pub package_network: bool,

    /// Retry idempotent steps once when the sandbox fails to start.
    #[serde(default = "default_true")]
    pub retry_transient: bool,

    /// Paths bound writable inside the sandbox. Filled from the security
    /// section's allowed directories and package state paths when empty.
    #[serde(default)]
    pub writable_paths: Vec<PathBuf>,

    /// `PATH` handed to the child process.
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            bwrap_path: default_bwrap_path(),
            step_timeout_secs: default_step_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            allow_network: false,
            package_network: true,
            retry_transient: true,
            writable_paths: Vec::new(),
            search_path: default_search_path(),
        }
    }
}

impl SandboxConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Whether a step with `effect` may reach the network.
    pub fn network_for(&self, effect: &Effect) -> bool {
        self.allow_network
            || (self.package_network
                && matches!(effect, Effect::Install { .. } | Effect::Refresh { .. }))
    }
}

fn default_true() -> bool {
    true
}

fn default_bwrap_path() -> PathBuf {
    PathBuf::from("bwrap")
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_search_path() -> String {
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackageManager;

    #[test]
    fn network_is_granted_per_effect() {
        let sandbox = SandboxConfig::default();
        let install = PackageManager::Apt.install_step("nginx", "/tmp", None);
        let remove = PackageManager::Apt.remove_step("nginx", "/tmp", None);
        assert!(sandbox.network_for(&install.effect));
        assert!(!sandbox.network_for(&remove.effect));

        let offline = SandboxConfig {
            package_network: false,
            ..SandboxConfig::default()
        };
        assert!(!offline.network_for(&install.effect));

        let open = SandboxConfig {
            allow_network: true,
            ..SandboxConfig::default()
        };
        assert!(open.network_for(&remove.effect));
    }

    #[test]
    fn bubblewrap_is_the_default() {
        assert_eq!(SandboxConfig::default().isolation, Isolation::Bubblewrap);
    }
}
