//! `trellis resume` command implementation

use crate::commands::review;
use crate::context::CliContext;
use colored::Colorize;
use trellis_kernel::workflow::{CheckpointStore, CompiledGraph, ResumeToken, ReviewResponse};

/// Execute the `trellis resume` command
pub async fn run(
    ctx: &CliContext,
    token: &str,
    answer: ReviewResponse,
    detach: bool,
) -> anyhow::Result<()> {
    let token = ResumeToken::from(token);
    let checkpoint = ctx
        .store
        .find_by_token(&token)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No pending review for token {}", token))?;

    println!(
        "{} Resuming {} run {} ({})",
        "→".green(),
        checkpoint.graph_id.cyan(),
        checkpoint.run_id,
        answer.kind()
    );

    // Suspended runs always come from a reviewed graph
    let workflow = ctx.workflow(&checkpoint.graph_id, true)?;
    let outcome = workflow.resume(&token, answer).await?;
    review::settle(ctx, &workflow, outcome, detach).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::report;
    use crate::config::TrellisConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resume_detached_run_to_completion() {
        let dir = TempDir::new().unwrap();
        let ctx = CliContext::with_config(TrellisConfig {
            checkpoint_dir: dir.path().join("ckpt"),
            output_dir: dir.path().join("out"),
            ..Default::default()
        })
        .await
        .unwrap();

        report::run(&ctx, "ocean tides", true, true).await.unwrap();
        let tokens: Vec<String> = ctx.store.list().await.unwrap()[0]
            .pending
            .iter()
            .map(|p| p.token.to_string())
            .collect();
        assert_eq!(tokens.len(), 3);

        run(&ctx, &tokens[0], ReviewResponse::respond("Hand written intro"), true)
            .await
            .unwrap();
        for token in &tokens[1..] {
            run(&ctx, token, ReviewResponse::Accept, true).await.unwrap();
        }

        let report = std::fs::read_to_string(dir.path().join("out/ocean_tides.md")).unwrap();
        assert!(report.contains("## Introduction\n\nHand written intro"));
        assert!(ctx.store.list().await.unwrap().is_empty());

        assert!(run(&ctx, &tokens[0], ReviewResponse::Accept, true).await.is_err());
    }
}
