//! Read-only queries of installed package state.

use async_trait::async_trait;
use cortex_core::PackageManager;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Answers whether a package is installed, independently of any step's
/// exit code.
#[async_trait]
pub trait InstalledProbe: Send + Sync {
    async fn is_installed(&self, manager: PackageManager, package: &str) -> anyhow::Result<bool>;
}

/// Probe that runs the manager's own query tool (`dpkg-query`, `rpm -q`,
/// `pip3 show`) on the host.
pub struct SystemProbe {
    search_path: String,
    timeout: Duration,
}

impl SystemProbe {
    pub fn new(search_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            search_path: search_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl InstalledProbe for SystemProbe {
    async fn is_installed(&self, manager: PackageManager, package: &str) -> anyhow::Result<bool> {
        let query = manager.query_command(package);
        let child = Command::new(&query.program)
            .args(&query.args)
            .env_clear()
            .env("PATH", &self.search_path)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to run '{}': {}", query, e))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("'{}' timed out after {:?}", query, self.timeout))??;

        let code = output
            .status
            .code()
            .ok_or_else(|| anyhow::anyhow!("'{}' was killed by a signal", query))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let installed = manager.parse_installed(code, &stdout);
        tracing::debug!(
            manager = %manager,
            package = %package,
            exit_code = code,
            installed,
            "Probed package state"
        );
        Ok(installed)
    }
}
