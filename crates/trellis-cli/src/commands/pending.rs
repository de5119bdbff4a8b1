//! `trellis pending` command implementation

use crate::commands::review;
use crate::context::CliContext;
use colored::Colorize;
use trellis_kernel::workflow::CheckpointStore;

/// Execute the `trellis pending` command
pub async fn run(ctx: &CliContext) -> anyhow::Result<()> {
    println!(
        "{} Pending reviews in {}",
        "→".green(),
        ctx.config.checkpoint_dir.display()
    );

    let checkpoints = ctx.store.list().await?;
    if checkpoints.is_empty() {
        println!("  No suspended runs.");
        return Ok(());
    }

    for checkpoint in &checkpoints {
        println!();
        println!(
            "{} {} run {} ({} pending, suspended {})",
            "●".yellow(),
            checkpoint.graph_id.cyan(),
            checkpoint.run_id,
            checkpoint.pending.len(),
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        for pending in &checkpoint.pending {
            println!();
            review::print_pending(pending);
        }
    }
    Ok(())
}
