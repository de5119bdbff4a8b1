//! Trellis CLI - run workflow graphs with human review from the command line

mod cli;
mod commands;
mod config;
mod context;
mod error;

use clap::Parser;
use cli::{Cli, Commands};
use context::CliContext;
use tracing_subscriber::EnvFilter;

pub use error::CliError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::new(cli.config.as_deref())
        .await
        .map_err(|report| anyhow::anyhow!("{:?}", report))?;

    match cli.command {
        Commands::Report {
            topic,
            review,
            detach,
        } => {
            commands::report::run(&ctx, &topic, review, detach).await?;
        }

        Commands::Triage {
            email,
            review,
            detach,
        } => {
            commands::triage::run(&ctx, &email, review, detach).await?;
        }

        Commands::Resume {
            token,
            accept,
            edit,
            respond,
            detach,
        } => {
            let answer = cli::answer_from_flags(accept, edit.as_deref(), respond.as_deref())?;
            commands::resume::run(&ctx, &token, answer, detach).await?;
        }

        Commands::Pending => {
            commands::pending::run(&ctx).await?;
        }
    }

    Ok(())
}
