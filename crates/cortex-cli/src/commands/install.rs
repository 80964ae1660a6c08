//! `cortex install`

use super::{Context, ExecuteOptions, submit};
use anyhow::{Context as _, Result};
use cortex_core::PackageManager;
use cortex_planner::{PlanContext, planner_from_config};

pub async fn run(
    ctx: &Context,
    request: &str,
    manager: Option<PackageManager>,
    options: ExecuteOptions,
) -> Result<()> {
    let mut context = PlanContext::from_config(&ctx.config);
    if let Some(manager) = manager {
        context = context.with_manager(manager);
    }

    let planner = planner_from_config(&ctx.config).context("Failed to set up planner")?;
    let plan = planner
        .propose_plan(request, &context)
        .await
        .with_context(|| format!("Could not plan '{}'", request))?;
    tracing::info!(plan_id = %plan.plan_id, target = %plan.target, "Plan proposed");

    submit(ctx, plan, options).await
}
