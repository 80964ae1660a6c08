//! Configuration for Cortex.
//!
//! A single YAML file (`config.yaml`) carries every section. Each section is
//! optional and falls back to conservative defaults, so a missing file is a
//! valid configuration.
//!
//! # Location
//!
//! 1. `--config <path>` on the command line
//! 2. `$CORTEX_HOME/config.yaml`
//! 3. `~/.cortex/config.yaml`
//!
//! Relative paths inside the file resolve against the file's directory.

pub mod history;
pub mod install;
pub mod planner;
pub mod sandbox;
pub mod security;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use history::HistoryConfig;
pub use install::{InstallConfig, StackDefinition};
pub use planner::{PlannerConfig, PlannerKind};
pub use sandbox::{Isolation, SandboxConfig};
pub use security::{DenyPattern, SecurityConfig};

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const HOME_ENV: &str = "CORTEX_HOME";

/// Complete Cortex configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub install: InstallConfig,

    /// Named package bundles.
    #[serde(default = "install::default_stacks")]
    pub stacks: Vec<StackDefinition>,

    /// Directory the configuration was loaded from.
    #[serde(skip)]
    pub home: PathBuf,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            security: SecurityConfig::default(),
            sandbox: SandboxConfig::default(),
            history: HistoryConfig::default(),
            confirmation: ConfirmationConfig::default(),
            planner: PlannerConfig::default(),
            install: InstallConfig::default(),
            stacks: install::default_stacks(),
            home: default_home(),
        }
    }
}

/// Confirmation channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Unanswered confirmations are denied after this long.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

/// `$CORTEX_HOME`, else `~/.cortex`.
pub fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".cortex"))
        .unwrap_or_else(|| PathBuf::from(".cortex"))
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CortexConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base_dir);
        config.home = base_dir;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load from an explicit path, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let home = default_home();
        let path = home.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self {
                home,
                ..Self::default()
            })
        }
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(dir) = &self.history.directory
            && dir.is_relative()
        {
            self.history.directory = Some(base_dir.join(dir));
        }

        // Bare program names are looked up on PATH; only relative paths
        // with a directory component are anchored.
        if let Some(cmd) = &self.planner.command
            && cmd.is_relative()
            && cmd.components().count() > 1
        {
            self.planner.command = Some(base_dir.join(cmd));
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.step_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "sandbox.step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(ConfigError::Config(
                "sandbox.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.isolation == Isolation::Host && !self.sandbox.allow_network {
            return Err(ConfigError::Config(
                "sandbox.isolation 'host' cannot restrict the filesystem or network; \
                 set sandbox.allow_network: true to accept that, or use 'bubblewrap'"
                    .to_string(),
            ));
        }
        if self.planner.kind == PlannerKind::External && self.planner.command.is_none() {
            return Err(ConfigError::Config(
                "planner.command is required when planner.kind is 'external'".to_string(),
            ));
        }
        for dir in self
            .security
            .allowed_dirs
            .iter()
            .chain(&self.security.package_state_paths)
        {
            if dir.is_relative() {
                return Err(ConfigError::Config(format!(
                    "security paths must be absolute: {}",
                    dir.display()
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for stack in &self.stacks {
            if !seen.insert(stack.id.as_str()) {
                return Err(ConfigError::Config(format!(
                    "duplicate stack id '{}'",
                    stack.id
                )));
            }
            if stack.packages.is_empty() {
                return Err(ConfigError::Config(format!(
                    "stack '{}' has no packages",
                    stack.id
                )));
            }
        }
        Ok(())
    }

    /// Directory holding transaction records.
    pub fn history_dir(&self) -> PathBuf {
        self.history
            .directory
            .clone()
            .unwrap_or_else(|| self.home.join("history"))
    }

    /// Sandbox settings with writable paths filled from the security
    /// section when not configured explicitly.
    pub fn effective_sandbox(&self) -> SandboxConfig {
        let mut sandbox = self.sandbox.clone();
        if sandbox.writable_paths.is_empty() {
            sandbox.writable_paths = self
                .security
                .allowed_dirs
                .iter()
                .chain(&self.security.package_state_paths)
                .cloned()
                .collect();
        }
        sandbox
    }

    pub fn stack(&self, id: &str) -> Option<&StackDefinition> {
        self.stacks.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackageManager;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = CortexConfig::from_yaml("").unwrap();
        assert_eq!(config.sandbox.step_timeout_secs, 300);
        assert_eq!(config.install.default_manager, PackageManager::Apt);
        assert!(config.security.allowed_programs.iter().any(|p| p == "apt-get"));
        assert!(config.stack("web").is_some());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
sandbox:
  isolation: bubblewrap
  step_timeout_secs: 30
install:
  default_manager: dnf
  use_sudo: true
"#;
        let config = CortexConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sandbox.isolation, Isolation::Bubblewrap);
        assert_eq!(config.sandbox.step_timeout_secs, 30);
        assert_eq!(config.sandbox.max_output_bytes, 64 * 1024);
        assert_eq!(config.install.default_manager, PackageManager::Dnf);
        assert_eq!(config.install.wrapper(), Some("sudo"));
        assert!(config.install.refresh_index);
    }

    #[test]
    fn relative_history_dir_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "history:\n  directory: records\n").unwrap();

        let config = CortexConfig::from_file(&path).unwrap();
        assert_eq!(config.history_dir(), dir.path().join("records"));
        assert_eq!(config.home, dir.path());
    }

    #[test]
    fn external_planner_requires_command() {
        let err = CortexConfig::from_yaml("planner:\n  kind: external\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("planner.command"));
    }

    #[test]
    fn host_isolation_requires_explicit_network() {
        let err = CortexConfig::from_yaml("sandbox:\n  isolation: host\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("allow_network"));

        let yaml = "sandbox:\n  isolation: host\n  allow_network: true\n";
        assert!(CortexConfig::from_yaml(yaml).unwrap().validate().is_ok());
        assert!(CortexConfig::default().validate().is_ok());
    }

    #[test]
    fn effective_sandbox_binds_allowed_and_state_paths() {
        let config = CortexConfig::default();
        let sandbox = config.effective_sandbox();
        assert!(sandbox.writable_paths.contains(&PathBuf::from("/tmp")));
        assert!(sandbox.writable_paths.contains(&PathBuf::from("/var/lib/dpkg")));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            CortexConfig::load(Some(&missing)),
            Err(ConfigError::Io(_))
        ));
    }
}
