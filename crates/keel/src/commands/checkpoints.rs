use crate::cli::CheckpointCommands;
use anyhow::{bail, Context, Result};
use keel_adapters::workspace_guard::absolute_path;
use keel_runtime::{CheckpointManager, CheckpointSnapshot, RewindTarget};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load a saved session, run one checkpoint operation, and write the
/// snapshot back if history changed.
pub async fn execute(dir: &Path, action: CheckpointCommands) -> Result<()> {
    let snapshot = CheckpointSnapshot::load(dir)?;
    let manager = CheckpointManager::new(snapshot.session_id.clone());
    manager.restore(snapshot);

    match action {
        CheckpointCommands::List { path } => {
            let checkpoints = match path {
                Some(path) => manager.history(&resolve(&path)?),
                None => manager.list(),
            };
            if checkpoints.is_empty() {
                println!("No checkpoints");
            }
            for cp in checkpoints {
                println!(
                    "{:<8} {:<7} {} {} ({})",
                    cp.id,
                    format!("{:?}", cp.kind).to_lowercase(),
                    cp.timestamp.format("%H:%M:%S"),
                    cp.path.display(),
                    cp.tool
                );
            }
        }
        CheckpointCommands::Summary => {
            let summary = manager.summary();
            println!(
                "{} changes: {} created, {} modified, {} deleted",
                summary.total, summary.creates, summary.modifies, summary.deletes
            );
            for file in summary.files {
                println!(
                    "  {} ({} changes, last by {})",
                    file.path.display(),
                    file.changes,
                    file.last_tool
                );
            }
        }
        CheckpointCommands::Rewind {
            id,
            path,
            count,
            all,
        } => {
            let target = match (id, path, count, all) {
                (Some(id), _, _, _) => RewindTarget::Checkpoint(id),
                (_, Some(path), _, _) => RewindTarget::Path(resolve(&path)?),
                (_, _, Some(n), _) => RewindTarget::Count(n),
                (_, _, _, true) => RewindTarget::All,
                _ => bail!("Specify one of --id, --path, --count or --all"),
            };
            let result = manager.rewind(target).await;
            for reverted in &result.reverted {
                println!("reverted {} {}", reverted.checkpoint_id, reverted.path.display());
            }
            for failure in &result.failed {
                println!(
                    "failed   {} {}: {}",
                    failure.checkpoint_id,
                    failure.path.display(),
                    failure.error
                );
            }
            println!("{}", result);
            manager.snapshot().save(dir)?;
            if !result.is_complete() {
                bail!("Rewind incomplete: {} checkpoint(s) failed", result.failed.len());
            }
        }
        CheckpointCommands::Clear => {
            let cleared = manager.clear();
            manager.snapshot().save(dir)?;
            println!("Cleared {} checkpoints", cleared);
        }
    }

    info!(dir = ?dir, remaining = manager.len(), "Checkpoint command finished");
    Ok(())
}

/// Checkpoints hold absolute canonical paths; resolve user input the same way
fn resolve(path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(absolute_path(&cwd, path))
}
