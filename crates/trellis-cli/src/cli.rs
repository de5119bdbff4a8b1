//! CLI command definitions using clap

use crate::CliError;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use trellis_kernel::workflow::ReviewResponse;

/// Trellis CLI - Run report and triage workflows
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./trellis.toml when present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a report on a topic
    Report {
        /// Report topic
        #[arg(short, long)]
        topic: String,

        /// Ask a reviewer before each section is written
        #[arg(short, long)]
        review: bool,

        /// Print resume tokens instead of prompting
        #[arg(short, long, requires = "review")]
        detach: bool,
    },

    /// Classify an email and turn actionable mail into a report
    Triage {
        /// Email file, or `-` for stdin
        #[arg(short, long)]
        email: String,

        /// Ask a reviewer before each section is written
        #[arg(short, long)]
        review: bool,

        /// Print resume tokens instead of prompting
        #[arg(short, long, requires = "review")]
        detach: bool,
    },

    /// Answer one pending review of a suspended run
    #[command(group(
        ArgGroup::new("answer")
            .required(true)
            .args(["accept", "edit", "respond"])
    ))]
    Resume {
        /// Resume token printed when the run suspended
        #[arg(short, long)]
        token: String,

        /// Run the node with its proposed input
        #[arg(long)]
        accept: bool,

        /// Run the node with this JSON input instead
        #[arg(long, value_name = "JSON")]
        edit: Option<String>,

        /// Skip the node and use this text as its output
        #[arg(long, value_name = "TEXT")]
        respond: Option<String>,

        /// Print remaining tokens instead of prompting for them
        #[arg(short, long)]
        detach: bool,
    },

    /// List pending reviews of suspended runs
    Pending,
}

/// Build the review answer selected by `resume` flags
pub fn answer_from_flags(
    accept: bool,
    edit: Option<&str>,
    respond: Option<&str>,
) -> Result<ReviewResponse, CliError> {
    match (accept, edit, respond) {
        (true, None, None) => Ok(ReviewResponse::Accept),
        (false, Some(json), None) => {
            let args = serde_json::from_str(json)
                .map_err(|e| CliError::Review(format!("--edit is not valid JSON: {}", e)))?;
            Ok(ReviewResponse::edit(args))
        }
        (false, None, Some(text)) => Ok(ReviewResponse::respond(text)),
        _ => Err(CliError::Review(
            "choose exactly one of --accept, --edit or --respond".to_string(),
        )),
    }
}
