//! Intent-to-plan translation.
//!
//! A [`Planner`] turns request text into a candidate [`Plan`]. Planner output
//! is untrusted: every plan still passes the security validator before any
//! step runs, whichever planner produced it.

pub mod error;
pub mod external;
pub mod literal;
pub mod request;

use async_trait::async_trait;
use cortex_core::{CortexConfig, PackageManager, Plan, PlannerKind, StackDefinition};
use serde::Serialize;
use std::path::PathBuf;

pub use error::PlannerError;
pub use external::ExternalPlanner;
pub use literal::LiteralPlanner;
pub use request::{validate_package_name, validate_request};

/// What a planner may assume about the host.
#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub manager: PackageManager,
    /// Privilege wrapper for system package managers, if any.
    pub wrapper: Option<String>,
    pub working_dir: PathBuf,
    pub refresh_index: bool,
    pub stacks: Vec<StackDefinition>,
}

impl PlanContext {
    pub fn from_config(config: &CortexConfig) -> Self {
        Self {
            manager: config.install.default_manager,
            wrapper: config.install.wrapper().map(str::to_string),
            working_dir: config.install.working_dir.clone(),
            refresh_index: config.install.refresh_index,
            stacks: config.stacks.clone(),
        }
    }

    /// Same context with a different package manager.
    pub fn with_manager(mut self, manager: PackageManager) -> Self {
        self.manager = manager;
        self
    }

    pub fn stack(&self, id: &str) -> Option<&StackDefinition> {
        self.stacks.iter().find(|s| s.id == id)
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose_plan(&self, request: &str, context: &PlanContext)
    -> Result<Plan, PlannerError>;
}

/// Planner that refuses every request.
pub struct NoopPlanner;

#[async_trait]
impl Planner for NoopPlanner {
    async fn propose_plan(
        &self,
        request: &str,
        _context: &PlanContext,
    ) -> Result<Plan, PlannerError> {
        tracing::debug!(request = %request, "Noop planner refusing request");
        Err(PlannerError::NotConfigured(
            "planner.kind is 'none'".to_string(),
        ))
    }
}

/// Build the planner selected by `config.planner`.
pub fn planner_from_config(config: &CortexConfig) -> Result<Box<dyn Planner>, PlannerError> {
    let planner = &config.planner;
    match planner.kind {
        PlannerKind::Literal => Ok(Box::new(LiteralPlanner::new(planner.max_request_len))),
        PlannerKind::External => Ok(Box::new(ExternalPlanner::from_config(planner)?)),
        PlannerKind::None => Ok(Box::new(NoopPlanner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_planner_refuses() {
        let context = PlanContext::from_config(&CortexConfig::default());
        let result = NoopPlanner.propose_plan("install nginx", &context).await;
        assert!(matches!(result, Err(PlannerError::NotConfigured(_))));
    }

    #[test]
    fn context_follows_install_config() {
        let mut config = CortexConfig::default();
        config.install.use_sudo = true;
        config.install.default_manager = PackageManager::Dnf;
        let context = PlanContext::from_config(&config);
        assert_eq!(context.wrapper.as_deref(), Some("sudo"));
        assert_eq!(context.manager, PackageManager::Dnf);
        assert!(context.stack("web").is_some());
    }

    #[test]
    fn factory_honours_kind() {
        let mut config = CortexConfig::default();
        assert!(planner_from_config(&config).is_ok());

        config.planner.kind = PlannerKind::External;
        assert!(matches!(
            planner_from_config(&config),
            Err(PlannerError::NotConfigured(_))
        ));
    }
}
