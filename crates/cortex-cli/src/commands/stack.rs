//! `cortex stack list|describe|install`

use super::{Context, ExecuteOptions, submit};
use anyhow::{Context as _, Result};
use cortex_planner::{LiteralPlanner, PlanContext};

pub fn list(ctx: &Context) {
    let stacks = &ctx.config.stacks;
    if stacks.is_empty() {
        println!("No stacks configured.");
        return;
    }
    println!("Available stacks:\n");
    for stack in stacks {
        let tags = if stack.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", stack.tags.join(", "))
        };
        println!(
            "  {:<16} {} ({} packages){}",
            stack.id,
            stack.name,
            stack.packages.len(),
            tags
        );
    }
    println!("\nUse: cortex stack describe <id>");
}

pub fn describe(ctx: &Context, id: &str) -> Result<()> {
    let stack = ctx
        .config
        .stack(id)
        .with_context(|| format!("Stack '{}' not found. Use 'cortex stack list'.", id))?;
    let manager = stack.manager.unwrap_or(ctx.config.install.default_manager);

    println!("Stack: {}", stack.name);
    if !stack.description.is_empty() {
        println!("{}", stack.description);
    }
    println!("\nPackages ({}):", manager);
    for (index, package) in stack.packages.iter().enumerate() {
        println!("  {}. {}", index + 1, package);
    }
    Ok(())
}

pub async fn install(ctx: &Context, id: &str, options: ExecuteOptions) -> Result<()> {
    let context = PlanContext::from_config(&ctx.config);
    let plan = LiteralPlanner::new(ctx.config.planner.max_request_len)
        .plan_stack(id, &context)
        .with_context(|| format!("Could not plan stack '{}'", id))?;
    submit(ctx, plan, options).await
}
