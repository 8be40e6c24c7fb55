use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::atomic::write_atomic;

use super::types::{
    ChangeKind, CheckpointSnapshot, CheckpointSummary, FileChange, FileCheckpoint, FileSummary,
    RevertedChange, RewindFailure, RewindResult, RewindTarget,
};

#[derive(Debug)]
enum FileState {
    Missing,
    Present(Vec<u8>),
    /// Could not be read; no checkpoint will be recorded for it
    Unreadable(String),
}

impl FileState {
    async fn read(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => FileState::Present(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => FileState::Missing,
            Err(e) => FileState::Unreadable(e.to_string()),
        }
    }

    fn into_content(self) -> Option<Option<Vec<u8>>> {
        match self {
            FileState::Missing => Some(None),
            FileState::Present(bytes) => Some(Some(bytes)),
            FileState::Unreadable(_) => None,
        }
    }
}

/// Before-state of a mutating call's target paths.
///
/// Holds the per-path locks until `commit`, so two calls touching the same
/// path cannot interleave their before/after snapshots.
pub struct PendingCapture {
    files: Vec<(PathBuf, FileState)>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Session-scoped, append-only history of file changes with rewind
pub struct CheckpointManager {
    session_id: String,
    checkpoints: Mutex<Vec<FileCheckpoint>>,
    path_locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
    rewind_lock: tokio::sync::Mutex<()>,
    next_seq: AtomicU64,
}

impl CheckpointManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoints: Mutex::new(Vec::new()),
            path_locks: DashMap::new(),
            rewind_lock: tokio::sync::Mutex::new(()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lock and snapshot `paths` ahead of a mutating call
    pub async fn capture(&self, mut paths: Vec<PathBuf>) -> PendingCapture {
        // sorted acquisition keeps multi-path callers deadlock-free
        paths.sort();
        paths.dedup();
        let guards = self.lock_paths(&paths).await;

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let state = FileState::read(&path).await;
            if let FileState::Unreadable(reason) = &state {
                warn!(path = ?path, reason = %reason, "Cannot snapshot file before mutation");
            }
            files.push((path, state));
        }
        PendingCapture {
            files,
            _guards: guards,
        }
    }

    /// Compare against the after-state and append one checkpoint per changed file
    pub async fn commit(
        &self,
        pending: PendingCapture,
        tool: &str,
        call_id: Option<&str>,
    ) -> Vec<FileCheckpoint> {
        let mut recorded = Vec::new();
        for (path, before) in pending.files {
            let Some(previous) = before.into_content() else {
                continue;
            };
            let after = FileState::read(&path).await;
            let Some(new) = after.into_content() else {
                warn!(path = ?path, "Cannot snapshot file after mutation");
                continue;
            };
            let change = FileChange {
                path,
                previous,
                new,
                tool: tool.to_string(),
                call_id: call_id.map(String::from),
            };
            if let Some(cp) = self.record(change) {
                recorded.push(cp);
            }
        }
        recorded
        // path locks released here
    }

    /// Append a change. Returns `None` when the change is a no-op.
    pub fn record(&self, change: FileChange) -> Option<FileCheckpoint> {
        let kind = change.kind()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let checkpoint = FileCheckpoint {
            id: format!("cp-{}", seq),
            seq,
            path: change.path,
            kind,
            timestamp: Utc::now(),
            previous: change.previous,
            new: change.new,
            tool: change.tool,
            call_id: change.call_id,
        };

        debug!(id = %checkpoint.id, path = ?checkpoint.path, kind = ?kind, "Checkpoint recorded");
        self.lock_store().push(checkpoint.clone());
        Some(checkpoint)
    }

    /// Changes to `path`, oldest first
    pub fn history(&self, path: &Path) -> Vec<FileCheckpoint> {
        let mut history: Vec<FileCheckpoint> = self
            .lock_store()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect();
        history.sort_by_key(|c| c.seq);
        history
    }

    /// Every checkpoint in the session, oldest first
    pub fn list(&self) -> Vec<FileCheckpoint> {
        let mut all = self.lock_store().clone();
        all.sort_by_key(|c| c.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.lock_store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revert the selected checkpoints, newest first.
    ///
    /// Each file reverts independently: a failure on one file never stops
    /// the others. Once a file fails, its older checkpoints in the same
    /// rewind are skipped so its undo chain stays intact. Reverted
    /// checkpoints leave the history; failed and skipped ones stay.
    pub async fn rewind(&self, target: RewindTarget) -> RewindResult {
        let _serial = self.rewind_lock.lock().await;
        let (selected, _guards) = self.select_locked(&target).await;
        if selected.is_empty() {
            debug!(target = ?target, "Nothing to rewind");
            return RewindResult::default();
        }

        let mut result = RewindResult::default();
        let mut broken: HashSet<PathBuf> = HashSet::new();

        for checkpoint in &selected {
            if broken.contains(&checkpoint.path) {
                result.failed.push(RewindFailure {
                    checkpoint_id: checkpoint.id.clone(),
                    path: checkpoint.path.clone(),
                    error: "skipped: a newer change to this file failed to revert".to_string(),
                });
                continue;
            }

            match revert(checkpoint).await {
                Ok(()) => result.reverted.push(RevertedChange {
                    checkpoint_id: checkpoint.id.clone(),
                    path: checkpoint.path.clone(),
                    kind: checkpoint.kind,
                }),
                Err(e) => {
                    warn!(id = %checkpoint.id, path = ?checkpoint.path, error = %e, "Rewind failed");
                    broken.insert(checkpoint.path.clone());
                    result.failed.push(RewindFailure {
                        checkpoint_id: checkpoint.id.clone(),
                        path: checkpoint.path.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        let reverted: HashSet<&str> = result
            .reverted
            .iter()
            .map(|r| r.checkpoint_id.as_str())
            .collect();
        self.lock_store()
            .retain(|c| !reverted.contains(c.id.as_str()));

        info!(
            session = %self.session_id,
            reverted = result.reverted.len(),
            failed = result.failed.len(),
            "Rewind finished"
        );
        result
    }

    pub fn summary(&self) -> CheckpointSummary {
        let all = self.list();
        let mut summary = CheckpointSummary {
            total: all.len(),
            ..CheckpointSummary::default()
        };
        let mut files: BTreeMap<PathBuf, FileSummary> = BTreeMap::new();

        for cp in all {
            match cp.kind {
                ChangeKind::Create => summary.creates += 1,
                ChangeKind::Modify => summary.modifies += 1,
                ChangeKind::Delete => summary.deletes += 1,
            }
            let entry = files.entry(cp.path.clone()).or_insert_with(|| FileSummary {
                path: cp.path.clone(),
                changes: 0,
                last_tool: String::new(),
                last_change: cp.timestamp,
            });
            entry.changes += 1;
            entry.last_tool = cp.tool;
            entry.last_change = cp.timestamp;
        }

        summary.files = files.into_values().collect();
        summary
    }

    /// Forget all checkpoints (e.g. after a commit). Files are untouched.
    pub fn clear(&self) -> usize {
        let mut store = self.lock_store();
        let n = store.len();
        store.clear();
        info!(session = %self.session_id, cleared = n, "Checkpoints cleared");
        n
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            session_id: self.session_id.clone(),
            saved_at: Utc::now(),
            checkpoints: self.list(),
        }
    }

    /// Replace history with a previously saved snapshot
    pub fn restore(&self, snapshot: CheckpointSnapshot) {
        let max_seq = snapshot.checkpoints.iter().map(|c| c.seq).max().unwrap_or(0);
        self.next_seq.fetch_max(max_seq + 1, Ordering::SeqCst);
        *self.lock_store() = snapshot.checkpoints;
    }

    /// Selected checkpoints, newest first
    fn select(&self, target: &RewindTarget) -> Vec<FileCheckpoint> {
        let mut all = self.list();
        all.reverse();
        match target {
            RewindTarget::All => all,
            RewindTarget::Count(n) => all.into_iter().take(*n).collect(),
            RewindTarget::Path(path) => all.into_iter().filter(|c| &c.path == path).take(1).collect(),
            RewindTarget::Checkpoint(id) => {
                let Some(anchor) = all.iter().find(|c| &c.id == id).cloned() else {
                    return Vec::new();
                };
                all.into_iter()
                    .filter(|c| c.path == anchor.path && c.seq >= anchor.seq)
                    .collect()
            }
        }
    }

    /// Select under the path locks of every selected checkpoint.
    ///
    /// A mutating call holding a path lock may commit while we wait for it,
    /// so the selection is redone once the locks are held. If the new
    /// selection names a path we do not hold yet, all locks are released
    /// and the larger set is taken again in sorted order.
    async fn select_locked(
        &self,
        target: &RewindTarget,
    ) -> (Vec<FileCheckpoint>, Vec<OwnedMutexGuard<()>>) {
        let mut locked: Vec<PathBuf> = Vec::new();
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::new();
        loop {
            let selected = self.select(target);
            let missing: Vec<PathBuf> = selected
                .iter()
                .map(|c| c.path.clone())
                .filter(|p| locked.binary_search(p).is_err())
                .collect();
            if missing.is_empty() {
                return (selected, guards);
            }

            drop(guards);
            locked.extend(missing);
            locked.sort();
            locked.dedup();
            guards = self.lock_paths(&locked).await;
        }
    }

    async fn lock_paths(&self, sorted: &[PathBuf]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            let lock = self
                .path_locks
                .entry(path.clone())
                .or_default()
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, Vec<FileCheckpoint>> {
        self.checkpoints.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Apply the inverse of one checkpoint to the filesystem
async fn revert(checkpoint: &FileCheckpoint) -> Result<()> {
    match (checkpoint.kind, &checkpoint.previous) {
        (ChangeKind::Create, _) => match tokio::fs::remove_file(&checkpoint.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("Failed to remove {:?}", checkpoint.path)),
        },
        (ChangeKind::Modify | ChangeKind::Delete, Some(previous)) => {
            write_atomic(&checkpoint.path, previous).await
        }
        (kind, None) => anyhow::bail!(
            "checkpoint {} ({:?}) has no previous content",
            checkpoint.id,
            kind
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(mgr: &CheckpointManager, path: &Path, prev: Option<&str>, new: Option<&str>) -> FileCheckpoint {
        mgr.record(FileChange {
            path: path.to_path_buf(),
            previous: prev.map(|s| s.as_bytes().to_vec()),
            new: new.map(|s| s.as_bytes().to_vec()),
            tool: "test".into(),
            call_id: None,
        })
        .unwrap()
    }

    #[test]
    fn test_noop_change_not_recorded() {
        let mgr = CheckpointManager::new("s");
        let none = mgr.record(FileChange {
            path: PathBuf::from("/x"),
            previous: Some(b"same".to_vec()),
            new: Some(b"same".to_vec()),
            tool: "t".into(),
            call_id: None,
        });
        assert!(none.is_none());
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_history_is_per_path_and_ordered() {
        let mgr = CheckpointManager::new("s");
        let a = PathBuf::from("/w/a");
        let b = PathBuf::from("/w/b");
        manual(&mgr, &a, None, Some("1"));
        manual(&mgr, &b, None, Some("x"));
        manual(&mgr, &a, Some("1"), Some("2"));

        let history = mgr.history(&a);
        assert_eq!(history.len(), 2);
        assert!(history[0].seq < history[1].seq);
        assert_eq!(history[1].kind, ChangeKind::Modify);
    }

    #[tokio::test]
    async fn test_capture_commit_detects_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mgr = CheckpointManager::new("s");

        let pending = mgr.capture(vec![path.clone()]).await;
        std::fs::write(&path, "hello").unwrap();
        let cps = mgr.commit(pending, "write_file", Some("c1")).await;
        assert_eq!(cps.len(), 1);
        assert_eq!(cps[0].kind, ChangeKind::Create);
        assert_eq!(cps[0].call_id.as_deref(), Some("c1"));

        // untouched file -> nothing recorded
        let pending = mgr.capture(vec![path.clone()]).await;
        assert!(mgr.commit(pending, "read_file", None).await.is_empty());

        let pending = mgr.capture(vec![path.clone()]).await;
        std::fs::remove_file(&path).unwrap();
        let cps = mgr.commit(pending, "delete", None).await;
        assert_eq!(cps[0].kind, ChangeKind::Delete);
        assert_eq!(cps[0].previous.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_rewind_checkpoint_id_unwinds_later_changes_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mgr = CheckpointManager::new("s");

        std::fs::write(&path, "v1").unwrap();
        manual(&mgr, &path, Some("v0"), Some("v1"));
        let middle = manual(&mgr, &path, Some("v1"), Some("v2"));
        manual(&mgr, &path, Some("v2"), Some("v3"));
        std::fs::write(&path, "v3").unwrap();

        let result = mgr.rewind(RewindTarget::Checkpoint(middle.id)).await;
        assert_eq!(result.reverted.len(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn test_rewind_unknown_checkpoint_is_empty() {
        let mgr = CheckpointManager::new("s");
        let result = mgr.rewind(RewindTarget::Checkpoint("cp-99".into())).await;
        assert!(result.reverted.is_empty());
        assert!(result.is_complete());
    }

    #[test]
    fn test_summary_groups_by_file() {
        let mgr = CheckpointManager::new("s");
        let a = PathBuf::from("/w/a");
        manual(&mgr, &a, None, Some("1"));
        manual(&mgr, &a, Some("1"), Some("2"));
        manual(&mgr, &PathBuf::from("/w/b"), Some("x"), None);

        let summary = mgr.summary();
        assert_eq!(summary.total, 3);
        assert_eq!((summary.creates, summary.modifies, summary.deletes), (1, 1, 1));
        assert_eq!(summary.files.len(), 2);
        assert_eq!(summary.files[0].path, a);
        assert_eq!(summary.files[0].changes, 2);
    }

    #[test]
    fn test_snapshot_restore_keeps_sequence_moving() {
        let mgr = CheckpointManager::new("s");
        manual(&mgr, Path::new("/w/a"), None, Some("1"));
        manual(&mgr, Path::new("/w/a"), Some("1"), Some("2"));
        let snapshot = mgr.snapshot();

        let fresh = CheckpointManager::new("s");
        fresh.restore(snapshot);
        let next = manual(&fresh, Path::new("/w/a"), Some("2"), Some("3"));
        assert_eq!(next.seq, 3);
        assert_eq!(fresh.history(Path::new("/w/a")).len(), 3);
    }
}
