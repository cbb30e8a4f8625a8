//! ABOUTME: Command line definition for the frigem binary
//! ABOUTME: `run` is the default; `cameras` and `analyze` are one-shot helpers

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "frigem", version, about = "Summarize Frigate detections with Gemini")]
pub struct Cli {
    /// TOML configuration file; FRIGEM__* environment variables override it
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for detections and publish summaries (default)
    Run,
    /// List the cameras Frigate reports
    Cameras,
    /// Summarize a local clip and print the result
    Analyze(AnalyzeOpts),
}

#[derive(Args, Debug)]
pub struct AnalyzeOpts {
    /// Path to an mp4 clip
    pub clip: PathBuf,

    /// Object label substituted into the prompt
    #[arg(long, short = 'l', default_value = "object")]
    pub label: String,
}
