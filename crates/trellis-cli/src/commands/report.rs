//! `trellis report` command implementation

use crate::commands::review;
use crate::context::CliContext;
use colored::Colorize;
use trellis_foundation::workflows::{REPORT_GRAPH, WorkflowState};
use trellis_kernel::workflow::CompiledGraph;

/// Execute the `trellis report` command
pub async fn run(ctx: &CliContext, topic: &str, review: bool, detach: bool) -> anyhow::Result<()> {
    println!("{} Writing a report on {}", "→".green(), topic.cyan());

    let workflow = ctx.workflow(REPORT_GRAPH, review)?;
    let outcome = workflow.invoke(WorkflowState::new(topic), None).await?;
    if let Some(state) = review::settle(ctx, &workflow, outcome, detach).await? {
        println!("  Sections: {}", state.completed_sections.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrellisConfig;
    use tempfile::TempDir;
    use trellis_kernel::workflow::CheckpointStore;

    async fn context(dir: &TempDir) -> CliContext {
        CliContext::with_config(TrellisConfig {
            checkpoint_dir: dir.path().join("ckpt"),
            output_dir: dir.path().join("out"),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_report_is_written() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        run(&ctx, "ocean tides", false, false).await.unwrap();

        let report = std::fs::read_to_string(dir.path().join("out/ocean_tides.md")).unwrap();
        assert!(report.starts_with("# Recovery Report\n\n## Topic: ocean tides"));
        assert!(report.contains("## Key Findings"));
        assert!(ctx.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detached_review_leaves_checkpoint() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        run(&ctx, "ocean tides", true, true).await.unwrap();

        let checkpoints = ctx.store.list().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].graph_id, REPORT_GRAPH);
        assert_eq!(checkpoints[0].pending.len(), 3);
        assert!(!dir.path().join("out").exists());
    }
}
