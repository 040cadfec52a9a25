//! videval CLI — run video-language model inference, judge the predictions,
//! and reconcile dataset IDs.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Evaluation toolkit for video-language models
#[derive(Parser, Debug)]
#[command(name = "videval", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to videval.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run model inference over a QA manifest
    Infer(commands::InferArgs),
    /// Score an inference output file with an LLM judge
    Judge(commands::JudgeArgs),
    /// Compare manifest IDs against a video directory
    Reconcile(commands::ReconcileArgs),
    /// Merge per-rank inference outputs into one file
    MergeShards(commands::MergeShardsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = videval_core::config::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Infer(args) => commands::run_infer(args, config.infer).await,
        Command::Judge(args) => commands::run_judge(args, config.judge).await,
        Command::Reconcile(args) => commands::run_reconcile(args),
        Command::MergeShards(args) => commands::run_merge_shards(args),
    }
}
