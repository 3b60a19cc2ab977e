mod commands;
mod engine;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tierflow_core::StackError;

/// Exit status for a stack rejected before anything reached the engine
const EXIT_REJECTED: i32 = 2;

#[derive(Parser)]
#[command(name = "tier")]
#[command(about = "Provision multi-tier cloud stacks from a KDL description", long_about = None)]
struct Cli {
    /// Stack file (defaults to stack.kdl discovery from the current directory)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stack file without contacting any engine
    Validate,
    /// Show the subnets and provisioning order without creating anything
    Plan {
        #[command(flatten)]
        engine: engine::EngineArgs,
    },
    /// Provision the stack
    Up {
        #[command(flatten)]
        engine: engine::EngineArgs,

        /// Write the provisioning report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Maximum number of resources provisioned at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Stop submitting resources after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Print the stack outputs as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let stack_file = match cli.file {
        Some(path) => path,
        None => tierflow_config::find_stack_file()?,
    };

    let result = match cli.command {
        Commands::Validate => commands::validate::handle(&stack_file),
        Commands::Plan { engine } => commands::plan::handle(&stack_file, &engine).await,
        Commands::Up {
            engine,
            report,
            concurrency,
            fail_fast,
            json,
        } => {
            let options = commands::up::UpOptions {
                report,
                concurrency,
                fail_fast,
                json,
            };
            commands::up::handle(&stack_file, &engine, options).await
        }
        Commands::Version => Ok(()),
    };

    if let Err(error) = &result
        && let Some(stack_error) = error.downcast_ref::<StackError>()
        && stack_error.is_structural()
    {
        eprintln!("{}", "✗ Stack rejected before provisioning".red().bold());
        eprintln!("  {}", stack_error);
        std::process::exit(EXIT_REJECTED);
    }
    result
}
