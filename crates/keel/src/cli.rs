use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel - tool execution engine for agent sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra hook layer files, lowest priority first (merged after the config's [hooks])
    #[arg(long = "hooks", global = true)]
    pub hook_files: Vec<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "keel.toml")]
        path: PathBuf,
    },
    /// Dispatch a batch of tool calls from a JSON plan file
    RunBatch {
        /// Path to plan JSON file ({"calls": [...]})
        #[arg(long)]
        file: PathBuf,

        /// Workspace the filesystem and shell tools operate in (default: current dir)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Cancel unstarted calls after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Run calls one at a time in submission order
        #[arg(long, conflicts_with = "max_concurrent")]
        sequential: bool,

        /// Override the configured concurrency limit
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Print the full results as JSON instead of one line per call
        #[arg(long)]
        json: bool,

        /// Save the session's checkpoints here after the batch, for `keel checkpoints`
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Inspect or rewind checkpoints saved by `run-batch --checkpoint-dir`
    Checkpoints {
        /// Directory holding checkpoints.json
        #[arg(long)]
        dir: PathBuf,

        #[command(subcommand)]
        action: CheckpointCommands,
    },
    /// Inspect configured hooks
    Hooks {
        #[command(subcommand)]
        action: HookCommands,
    },
}

#[derive(Subcommand)]
pub enum HookCommands {
    /// List hooks per event after merging all layers
    List,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// List checkpoints, oldest first
    List {
        /// Only show the history of this file
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Per-file change counts
    Summary,
    /// Revert recorded changes, newest first
    Rewind {
        /// A checkpoint id; later changes to the same file are reverted too
        #[arg(long, group = "target")]
        id: Option<String>,
        /// Revert the most recent change to this file
        #[arg(long, group = "target")]
        path: Option<PathBuf>,
        /// Revert the N most recent changes
        #[arg(long, group = "target")]
        count: Option<usize>,
        /// Revert everything
        #[arg(long, group = "target")]
        all: bool,
    },
    /// Forget all checkpoints without touching files
    Clear,
}
