use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stave",
    about = "Stave: inspect and maintain music documents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log engine activity to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new document directory
    Init(InitArgs),
    /// Summarize checkpoints and log segments
    Info(PathArgs),
    /// Print the document tree
    Tree(TreeArgs),
    /// List command log records
    Log(LogArgs),
    /// Write a checkpoint now
    Checkpoint(PathArgs),
    /// Replay the log and check tree integrity
    Verify(PathArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub path: PathBuf,
    /// Project name
    #[arg(long, default_value = "Untitled")]
    pub name: String,
}

#[derive(Args)]
pub struct PathArgs {
    pub path: PathBuf,
}

#[derive(Args)]
pub struct TreeArgs {
    pub path: PathBuf,
    /// Read the latest checkpoint only, without locking
    #[arg(long)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct LogArgs {
    pub path: PathBuf,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}
