//! Outcome handling shared by every run command
//!
//! A completed run has its report written to the output directory. A
//! suspended run is either reviewed at the terminal, one pending review at a
//! time, or left in the checkpoint directory with its tokens printed.

use crate::CliError;
use crate::context::{CliContext, Workflow};
use colored::Colorize;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use trellis_foundation::workflows::{WorkflowState, render_markdown_file};
use trellis_kernel::workflow::{
    CompiledGraph, PendingReview, ResponseKind, ReviewResponse, RunOutcome, Suspension,
};

/// Drive `outcome` to completion, or until the run is left detached.
///
/// Returns the final state of a completed run.
pub async fn settle(
    ctx: &CliContext,
    workflow: &Workflow,
    mut outcome: RunOutcome<WorkflowState>,
    detach: bool,
) -> anyhow::Result<Option<WorkflowState>> {
    loop {
        match outcome {
            RunOutcome::Completed { run_id, state } => {
                write_report(ctx, &run_id, &state).await?;
                return Ok(Some(state));
            }
            RunOutcome::Suspended(suspension) if detach => {
                print_detached(&suspension);
                return Ok(None);
            }
            RunOutcome::Suspended(suspension) => {
                let mut next = None;
                for pending in &suspension.pending {
                    let answer = prompt(pending)?;
                    next = Some(workflow.resume(&pending.token, answer).await?);
                }
                outcome = next.ok_or_else(|| {
                    anyhow::anyhow!(
                        "run {} suspended without pending reviews",
                        suspension.run_id
                    )
                })?;
            }
        }
    }
}

async fn write_report(ctx: &CliContext, run_id: &str, state: &WorkflowState) -> anyhow::Result<()> {
    let report = state
        .final_report
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("run {} finished without a report", run_id))?;
    let path = render_markdown_file(&ctx.config.output_dir, &state.topic, report).await?;
    println!(
        "{} Report written to {}",
        "✓".green(),
        path.display().to_string().cyan()
    );
    Ok(())
}

/// Print the tokens of a run left for later review
pub fn print_detached(suspension: &Suspension) {
    println!(
        "{} Run {} is waiting for {} review(s)",
        "⏸".yellow(),
        suspension.run_id.cyan(),
        suspension.pending.len()
    );
    for pending in &suspension.pending {
        println!();
        print_pending(pending);
    }
    println!();
    println!(
        "Resume with: {}",
        "trellis resume --token <token> --accept".bold()
    );
}

/// One pending review, indented for listings
pub fn print_pending(pending: &PendingReview) {
    let slot = match (pending.generation, pending.index) {
        (Some(generation), Some(index)) => format!("generation {} slot {}", generation, index),
        _ => "main path".to_string(),
    };
    println!("  {} {}", "token:".dimmed(), pending.token.to_string().green());
    println!("  {} {} ({})", "node: ".dimmed(), pending.node, slot);
    println!("  {} {}", "args: ".dimmed(), pending.request.args);
    let allowed: Vec<String> = pending
        .request
        .allowed_responses
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("  {} {}", "allow:".dimmed(), allowed.join(", "));
}

/// Ask the reviewer at the terminal for one response
fn prompt(pending: &PendingReview) -> Result<ReviewResponse, CliError> {
    let kinds = &pending.request.allowed_responses;
    if kinds.is_empty() {
        return Err(CliError::Review(format!(
            "review of '{}' allows no response",
            pending.node
        )));
    }

    println!();
    println!("{} {}", "Review:".bold().cyan(), pending.request.description);
    print_pending(pending);

    let theme = ColorfulTheme::default();
    let labels: Vec<String> = kinds.iter().map(ToString::to_string).collect();
    let choice = Select::with_theme(&theme)
        .with_prompt("Response")
        .items(&labels)
        .default(0)
        .interact()?;

    match kinds[choice] {
        ResponseKind::Accept => Ok(ReviewResponse::Accept),
        ResponseKind::Edit => {
            let text: String = Input::with_theme(&theme)
                .with_prompt("Edited args (JSON)")
                .with_initial_text(pending.request.args.to_string())
                .interact_text()?;
            Ok(ReviewResponse::edit(serde_json::from_str(&text)?))
        }
        ResponseKind::Respond => {
            let text: String = Input::with_theme(&theme)
                .with_prompt("Output")
                .interact_text()?;
            Ok(ReviewResponse::respond(text))
        }
    }
}
