use clap::{Parser, Subcommand};
use cortex_core::{PackageManager, TransactionStatus};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Context, ExecuteOptions};

#[derive(Parser, Debug)]
#[command(
    name = "cortex",
    version,
    about = "Validated, sandboxed and reversible software installs"
)]
struct Cli {
    /// Configuration file (default: $CORTEX_HOME/config.yaml or ~/.cortex/config.yaml)
    #[arg(long, global = true, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan an install from a request such as "nginx" or "pip install requests".
    /// Prints the validated plan unless --execute is given.
    Install {
        /// Request text
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,

        #[command(flatten)]
        execute: ExecuteArgs,

        /// Package manager to plan for (apt, dnf, yum, pip)
        #[arg(long)]
        manager: Option<PackageManager>,
    },

    /// Transaction history
    History {
        #[command(subcommand)]
        cmd: HistoryCommand,
    },

    /// Revert a sealed transaction by replaying its inverse steps
    Rollback {
        /// Transaction id
        id: String,

        /// Show the rollback plan and its decisions without executing
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Reverse what can be reversed, skipping steps without an inverse
        #[arg(long, default_value_t = false)]
        allow_partial: bool,

        /// Approve confirmation prompts
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },

    /// Named package bundles
    Stack {
        #[command(subcommand)]
        cmd: StackCommand,
    },

    /// Check the configuration and the host for problems
    Check,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct ExecuteArgs {
    /// Run the plan (default: print it)
    #[arg(long, default_value_t = false)]
    execute: bool,

    /// Validate and print only; never executes or records
    #[arg(long, default_value_t = false, conflicts_with = "execute")]
    dry_run: bool,

    /// Approve confirmation prompts
    #[arg(short, long, default_value_t = false)]
    yes: bool,
}

impl From<ExecuteArgs> for ExecuteOptions {
    fn from(args: ExecuteArgs) -> Self {
        Self {
            execute: args.execute && !args.dry_run,
            assume_yes: args.yes,
        }
    }
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List transactions, newest first
    List {
        /// Maximum number of entries (default: history.list_limit, else 20)
        #[arg(long)]
        limit: Option<usize>,

        /// Only this status (completed, partially_failed, failed, rolled_back)
        #[arg(long)]
        status: Option<TransactionStatus>,

        /// Only this target
        #[arg(long)]
        target: Option<String>,
    },

    /// Show one transaction in detail
    Show {
        id: String,

        /// Print the raw record as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Re-run the security validator on a stored plan
    Audit { id: String },
}

#[derive(Subcommand, Debug)]
enum StackCommand {
    /// List configured stacks
    List,

    /// Show a stack's packages
    Describe { id: String },

    /// Install every package of a stack
    Install {
        id: String,

        #[command(flatten)]
        execute: ExecuteArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Install {
            request,
            execute,
            manager,
        } => commands::install::run(&ctx, &request.join(" "), manager, execute.into()).await?,

        Command::History { cmd } => match cmd {
            HistoryCommand::List {
                limit,
                status,
                target,
            } => commands::history::list(&ctx, limit, status, target).await?,
            HistoryCommand::Show { id, json } => commands::history::show(&ctx, &id, json).await?,
            HistoryCommand::Audit { id } => commands::history::audit(&ctx, &id).await?,
        },

        Command::Rollback {
            id,
            dry_run,
            allow_partial,
            yes,
        } => commands::rollback::run(&ctx, &id, dry_run, allow_partial, yes).await?,

        Command::Stack { cmd } => match cmd {
            StackCommand::List => commands::stack::list(&ctx),
            StackCommand::Describe { id } => commands::stack::describe(&ctx, &id)?,
            StackCommand::Install { id, execute } => {
                commands::stack::install(&ctx, &id, execute.into()).await?
            }
        },

        Command::Check => commands::check::run(&ctx).await?,
    }

    Ok(())
}
