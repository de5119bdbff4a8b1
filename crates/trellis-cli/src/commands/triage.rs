//! `trellis triage` command implementation

use crate::commands::review;
use crate::context::CliContext;
use colored::Colorize;
use tokio::io::AsyncReadExt;
use trellis_foundation::workflows::{SPAM_REPORT, TRIAGE_GRAPH, WorkflowState};
use trellis_kernel::workflow::CompiledGraph;

/// Execute the `trellis triage` command
pub async fn run(ctx: &CliContext, email: &str, review: bool, detach: bool) -> anyhow::Result<()> {
    let body = read_email(email).await?;
    if body.trim().is_empty() {
        anyhow::bail!("email {} is empty", email);
    }
    println!("{} Triaging email ({} bytes)", "→".green(), body.len());

    let workflow = ctx.workflow(TRIAGE_GRAPH, review)?;
    let outcome = workflow.invoke(WorkflowState::new(body), None).await?;
    if let Some(state) = review::settle(ctx, &workflow, outcome, detach).await? {
        if state.final_report.as_deref() == Some(SPAM_REPORT) {
            println!("  {}", "Classified as spam".yellow());
        } else {
            println!("  Sections: {}", state.completed_sections.len());
        }
    }
    Ok(())
}

/// Read the email from a file, or from stdin for `-`
async fn read_email(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut body = String::new();
        tokio::io::stdin().read_to_string(&mut body).await?;
        Ok(body)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read email {}: {}", source, e))
    }
}
