//! Independent post-checks of step effects.
//!
//! An exit code of 0 is never taken as proof that a package is installed:
//! package effects are observed through an [`InstalledProbe`]. A probe that
//! fails yields a failed verification.

use crate::probe::InstalledProbe;
use cortex_core::{Effect, ExecutionResult, PackageManager, Step, VerificationResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct Verifier {
    probe: Arc<dyn InstalledProbe>,
}

impl Verifier {
    pub fn new(probe: Arc<dyn InstalledProbe>) -> Self {
        Self { probe }
    }

    pub async fn verify(&self, step: &Step, execution: &ExecutionResult) -> VerificationResult {
        if !execution.exited_as_expected(step) {
            return VerificationResult::skipped("not observed: step did not exit as expected");
        }

        match &step.effect {
            Effect::Install { manager, package } => {
                self.observe(*manager, package, true).await
            }
            Effect::Remove { manager, package } => {
                self.observe(*manager, package, false).await
            }
            Effect::Refresh { .. } | Effect::Command { .. } => VerificationResult::observed(
                true,
                format!(
                    "no independent observation for '{}'; accepted exit code {}",
                    step.effect,
                    execution.exit_code.unwrap_or_default()
                ),
            ),
        }
    }

    async fn observe(
        &self,
        manager: PackageManager,
        package: &str,
        want_installed: bool,
    ) -> VerificationResult {
        match self.probe.is_installed(manager, package).await {
            Ok(installed) => {
                let observed = if installed {
                    format!("{} is installed ({})", package, manager)
                } else {
                    format!("{} is not installed ({})", package, manager)
                };
                VerificationResult::observed(installed == want_installed, observed)
            }
            Err(err) => {
                tracing::warn!(package = %package, manager = %manager, "Probe failed: {:#}", err);
                VerificationResult::observed(false, format!("probe failed: {:#}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::{CommandSpec, ExecutionOutcome};
    use std::collections::HashSet;
    use uuid::Uuid;

    struct StaticProbe(HashSet<&'static str>);

    #[async_trait]
    impl InstalledProbe for StaticProbe {
        async fn is_installed(&self, _: PackageManager, package: &str) -> anyhow::Result<bool> {
            Ok(self.0.contains(package))
        }
    }

    struct BrokenProbe;

    #[async_trait]
    impl InstalledProbe for BrokenProbe {
        async fn is_installed(&self, _: PackageManager, _: &str) -> anyhow::Result<bool> {
            anyhow::bail!("dpkg-query: not found")
        }
    }

    fn exited(code: i32) -> ExecutionResult {
        ExecutionResult {
            sandbox_id: Uuid::new_v4(),
            outcome: ExecutionOutcome::Exited,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 1,
            attempts: 1,
            error: None,
        }
    }

    fn verifier(installed: &[&'static str]) -> Verifier {
        Verifier::new(Arc::new(StaticProbe(installed.iter().copied().collect())))
    }

    #[tokio::test]
    async fn install_is_observed_not_trusted() {
        let step = PackageManager::Apt.install_step("nginx", "/tmp", None);

        let result = verifier(&["nginx"]).verify(&step, &exited(0)).await;
        assert!(result.expected_state);
        assert!(result.checked);

        let result = verifier(&[]).verify(&step, &exited(0)).await;
        assert!(!result.expected_state);
        assert!(result.observed.contains("not installed"));
    }

    #[tokio::test]
    async fn removal_expects_absence() {
        let step = PackageManager::Apt.remove_step("nginx", "/tmp", None);
        assert!(verifier(&[]).verify(&step, &exited(0)).await.expected_state);
        assert!(!verifier(&["nginx"]).verify(&step, &exited(0)).await.expected_state);
    }

    #[tokio::test]
    async fn failed_execution_is_not_observed() {
        let step = PackageManager::Apt.install_step("nginx", "/tmp", None);
        let result = verifier(&["nginx"]).verify(&step, &exited(100)).await;
        assert!(!result.checked);
        assert!(!result.expected_state);
    }

    #[tokio::test]
    async fn opaque_command_verifies_on_exit_code() {
        let step = Step::new(
            CommandSpec::new("mkdir", ["/tmp/x"]),
            "/tmp",
            Effect::Command {
                summary: "create dir".to_string(),
            },
        );
        let result = verifier(&[]).verify(&step, &exited(0)).await;
        assert!(result.expected_state);
        assert!(result.observed.contains("no independent observation"));
    }

    #[tokio::test]
    async fn probe_failure_fails_closed() {
        let step = PackageManager::Apt.install_step("nginx", "/tmp", None);
        let result = Verifier::new(Arc::new(BrokenProbe))
            .verify(&step, &exited(0))
            .await;
        assert!(!result.expected_state);
        assert!(result.observed.contains("probe failed"));
    }
}
