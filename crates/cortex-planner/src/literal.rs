//! Built-in planner for literal requests.
//!
//! Understands a small grammar:
//!
//! - `nginx curl` / `install nginx and curl`
//! - `apt install nginx`, `pip install requests` (manager named explicitly)
//! - `remove nginx` / `uninstall nginx`
//! - `stack web`, `install stack web`, or a bare stack id
//!
//! Anything else is refused rather than guessed at.

use crate::error::PlannerError;
use crate::request::{validate_package_name, validate_request};
use crate::{PlanContext, Planner};
use async_trait::async_trait;
use cortex_core::{PackageManager, Plan, Step};
use std::collections::HashSet;
use std::str::FromStr;

const FILLER_WORDS: &[&str] = &["and", "the", "please", "package", "packages", "with", "plus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Install,
    Remove,
}

/// A parsed request before it becomes steps.
#[derive(Debug, PartialEq, Eq)]
struct Intent<'a> {
    operation: Operation,
    manager: Option<PackageManager>,
    stack: Option<&'a str>,
    packages: Vec<&'a str>,
}

pub struct LiteralPlanner {
    max_request_len: usize,
}

impl LiteralPlanner {
    pub fn new(max_request_len: usize) -> Self {
        Self { max_request_len }
    }

    /// Plan the installation of a configured stack.
    pub fn plan_stack(&self, id: &str, context: &PlanContext) -> Result<Plan, PlannerError> {
        let stack = context
            .stack(id)
            .ok_or_else(|| PlannerError::UnknownStack(id.to_string()))?;
        let manager = stack.manager.unwrap_or(context.manager);
        let packages: Vec<&str> = stack.packages.iter().map(String::as_str).collect();
        let steps = package_steps(Operation::Install, manager, &packages, context)?;
        Ok(Plan::new(format!("stack {}", id), stack.id.clone(), steps))
    }

    fn plan(&self, request: &str, context: &PlanContext) -> Result<Plan, PlannerError> {
        validate_request(request, self.max_request_len)?;
        let intent = parse(request, context)?;

        if let Some(id) = intent.stack {
            let mut plan = self.plan_stack(id, context)?;
            plan.request = request.to_string();
            return Ok(plan);
        }

        let manager = intent.manager.unwrap_or(context.manager);
        let steps = package_steps(intent.operation, manager, &intent.packages, context)?;
        Ok(Plan::new(request, target_for(&intent.packages), steps))
    }
}

#[async_trait]
impl Planner for LiteralPlanner {
    async fn propose_plan(
        &self,
        request: &str,
        context: &PlanContext,
    ) -> Result<Plan, PlannerError> {
        let plan = self.plan(request, context)?;
        tracing::debug!(
            plan_id = %plan.plan_id,
            target = %plan.target,
            steps = plan.steps.len(),
            "Literal planner produced plan"
        );
        Ok(plan)
    }
}

fn parse<'a>(request: &'a str, context: &PlanContext) -> Result<Intent<'a>, PlannerError> {
    let mut words: Vec<&str> = request
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .filter(|w| !FILLER_WORDS.contains(&w.to_ascii_lowercase().as_str()))
        .collect();

    if words.first() == Some(&"sudo") {
        words.remove(0);
    }

    let mut manager = None;
    if let Some(first) = words.first()
        && let Ok(m) = PackageManager::from_str(first)
    {
        manager = Some(m);
        words.remove(0);
    }

    let mut operation = Operation::Install;
    match words.first().map(|w| w.to_ascii_lowercase()) {
        Some(w) if w == "install" || w == "add" => {
            words.remove(0);
        }
        Some(w) if w == "remove" || w == "uninstall" || w == "purge" => {
            operation = Operation::Remove;
            words.remove(0);
        }
        _ => {}
    }

    if words.first() == Some(&"stack") {
        return match (operation, manager, words.as_slice()) {
            (Operation::Install, None, [_, id]) => Ok(Intent {
                operation,
                manager,
                stack: Some(*id),
                packages: Vec::new(),
            }),
            _ => Err(PlannerError::Unplannable(
                "expected 'stack <id>'".to_string(),
            )),
        };
    }

    if let [only] = words.as_slice()
        && operation == Operation::Install
        && manager.is_none()
        && context.stack(only).is_some()
    {
        return Ok(Intent {
            operation,
            manager,
            stack: Some(*only),
            packages: Vec::new(),
        });
    }

    if words.is_empty() {
        return Err(PlannerError::Unplannable(
            "request names no packages".to_string(),
        ));
    }
    for word in &words {
        validate_package_name(word)?;
    }
    let mut seen = HashSet::new();
    words.retain(|w| seen.insert(*w));

    Ok(Intent {
        operation,
        manager,
        stack: None,
        packages: words,
    })
}

fn package_steps(
    operation: Operation,
    manager: PackageManager,
    packages: &[&str],
    context: &PlanContext,
) -> Result<Vec<Step>, PlannerError> {
    if packages.is_empty() {
        return Err(PlannerError::Unplannable(
            "nothing to install".to_string(),
        ));
    }
    let wrapper = context.wrapper.as_deref();
    let working_dir = &context.working_dir;

    let mut steps = Vec::with_capacity(packages.len() + 1);
    if operation == Operation::Install
        && context.refresh_index
        && let Some(refresh) = manager.refresh_step(working_dir, wrapper)
    {
        steps.push(refresh);
    }
    for package in packages {
        validate_package_name(package)?;
        let step = match operation {
            Operation::Install => manager.install_step(package, working_dir, wrapper),
            Operation::Remove => manager.remove_step(package, working_dir, wrapper),
        };
        steps.push(step);
    }
    Ok(steps)
}

/// Lock identifier for a package request: the package names, sorted.
fn target_for(packages: &[&str]) -> String {
    let mut sorted = packages.to_vec();
    sorted.sort_unstable();
    sorted.join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{CortexConfig, Effect};

    fn context() -> PlanContext {
        PlanContext::from_config(&CortexConfig::default())
    }

    fn planner() -> LiteralPlanner {
        LiteralPlanner::new(1000)
    }

    fn effects(plan: &Plan) -> Vec<Effect> {
        plan.steps.iter().map(|s| s.effect.clone()).collect()
    }

    #[tokio::test]
    async fn bare_package_gets_refresh_and_install() {
        let plan = planner().propose_plan("nginx", &context()).await.unwrap();
        assert_eq!(plan.target, "nginx");
        assert_eq!(plan.request, "nginx");
        assert_eq!(
            effects(&plan),
            vec![
                Effect::Refresh {
                    manager: PackageManager::Apt
                },
                Effect::Install {
                    manager: PackageManager::Apt,
                    package: "nginx".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn natural_phrasing_lists_packages() {
        let plan = planner()
            .propose_plan("install curl, nginx and the git package", &context())
            .await
            .unwrap();
        let packages: Vec<_> = plan.steps.iter().filter_map(|s| s.effect.package()).collect();
        assert_eq!(packages, vec!["curl", "nginx", "git"]);
        assert_eq!(plan.target, "curl+git+nginx");
    }

    #[tokio::test]
    async fn explicit_manager_overrides_default() {
        let plan = planner()
            .propose_plan("pip install requests", &context())
            .await
            .unwrap();
        // pip has no index refresh
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].command.program, "pip3");
    }

    #[tokio::test]
    async fn remove_request_builds_remove_steps() {
        let plan = planner()
            .propose_plan("remove nginx", &context())
            .await
            .unwrap();
        assert_eq!(
            effects(&plan),
            vec![Effect::Remove {
                manager: PackageManager::Apt,
                package: "nginx".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn stack_request_expands_packages() {
        for request in ["stack web", "install stack web", "web"] {
            let plan = planner().propose_plan(request, &context()).await.unwrap();
            assert_eq!(plan.target, "web", "{request}");
            assert_eq!(plan.request, request);
            assert_eq!(plan.steps.len(), 3);
        }
    }

    #[tokio::test]
    async fn unknown_stack_is_refused() {
        let result = planner().propose_plan("stack nope", &context()).await;
        assert!(matches!(result, Err(PlannerError::UnknownStack(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn sudo_wrapper_comes_from_context() {
        let mut config = CortexConfig::default();
        config.install.use_sudo = true;
        config.install.refresh_index = false;
        let context = PlanContext::from_config(&config);
        let plan = planner().propose_plan("nginx", &context).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].command.program, "sudo");
    }

    #[tokio::test]
    async fn suspicious_names_are_refused() {
        let result = planner().propose_plan("install -rf", &context()).await;
        assert!(matches!(result, Err(PlannerError::InvalidPackageName(_))));

        let result = planner().propose_plan("install nginx; reboot", &context()).await;
        assert!(matches!(result, Err(PlannerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn verb_without_packages_is_unplannable() {
        let result = planner().propose_plan("install", &context()).await;
        assert!(matches!(result, Err(PlannerError::Unplannable(_))));
    }
}
