use keel_runtime::{
    ChangeKind, CheckpointManager, CheckpointSnapshot, RewindTarget,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Mutate `path` through capture/commit the way the dispatcher does
async fn mutate(mgr: &CheckpointManager, path: &Path, content: Option<&str>) {
    let pending = mgr.capture(vec![path.to_path_buf()]).await;
    match content {
        Some(text) => std::fs::write(path, text).unwrap(),
        None => std::fs::remove_file(path).unwrap(),
    }
    mgr.commit(pending, "test_tool", None).await;
}

fn read(path: &PathBuf) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

#[tokio::test]
async fn test_single_create_rewind_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("new.txt");
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &path, Some("fresh")).await;
    let result = mgr.rewind(RewindTarget::Count(1)).await;

    assert!(result.is_complete());
    assert_eq!(result.reverted[0].kind, ChangeKind::Create);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_single_modify_rewind_restores_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file.txt");
    std::fs::write(&path, "before").unwrap();
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &path, Some("after")).await;
    mgr.rewind(RewindTarget::Path(path.clone())).await;

    assert_eq!(read(&path).as_deref(), Some("before"));
}

#[tokio::test]
async fn test_single_delete_rewind_recreates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/deep/file.txt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "keep me").unwrap();
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &path, None).await;
    // parent directories disappear too; rewind recreates them
    std::fs::remove_dir_all(dir.path().join("nested")).unwrap();
    let result = mgr.rewind(RewindTarget::Count(1)).await;

    assert!(result.is_complete());
    assert_eq!(read(&path).as_deref(), Some("keep me"));
}

#[tokio::test]
async fn test_rewind_all_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&b, "b0").unwrap();
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &a, Some("a1")).await;
    mutate(&mgr, &b, Some("b1")).await;
    mutate(&mgr, &a, Some("a2")).await;
    mutate(&mgr, &b, None).await;

    let first = mgr.rewind(RewindTarget::All).await;
    assert_eq!(first.reverted.len(), 4);
    assert!(!a.exists());
    assert_eq!(read(&b).as_deref(), Some("b0"));
    assert!(mgr.is_empty());

    let second = mgr.rewind(RewindTarget::All).await;
    assert!(second.reverted.is_empty());
    assert!(second.is_complete());
    assert!(!a.exists());
    assert_eq!(read(&b).as_deref(), Some("b0"));
}

#[tokio::test]
async fn test_rewind_waits_for_in_flight_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("racy.txt");
    std::fs::write(&path, "v0").unwrap();
    let mgr = Arc::new(CheckpointManager::new("s"));
    mutate(&mgr, &path, Some("v1")).await;

    // a call is mid-flight on the same file when rewind starts
    let pending = mgr.capture(vec![path.clone()]).await;
    let rewind = tokio::spawn({
        let mgr = mgr.clone();
        async move { mgr.rewind(RewindTarget::All).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&path, "v2").unwrap();
    mgr.commit(pending, "test_tool", None).await;

    let result = rewind.await.unwrap();
    assert!(result.is_complete());
    assert_eq!(result.reverted.len(), 2);
    assert_eq!(read(&path).as_deref(), Some("v0"));
    assert!(mgr.is_empty());

    let again = mgr.rewind(RewindTarget::All).await;
    assert!(again.reverted.is_empty());
    assert_eq!(read(&path).as_deref(), Some("v0"));
}

#[tokio::test]
async fn test_rewind_count_follows_commit_on_another_path() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let mgr = Arc::new(CheckpointManager::new("s"));
    mutate(&mgr, &a, Some("a1")).await;

    let pending = mgr.capture(vec![a.clone(), b.clone()]).await;
    let rewind = tokio::spawn({
        let mgr = mgr.clone();
        async move { mgr.rewind(RewindTarget::Count(1)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&b, "b1").unwrap();
    mgr.commit(pending, "test_tool", None).await;

    // the newest change is now the create of b
    let result = rewind.await.unwrap();
    assert_eq!(result.reverted.len(), 1);
    assert_eq!(result.reverted[0].path, b);
    assert!(!b.exists());
    assert_eq!(read(&a).as_deref(), Some("a1"));
    assert_eq!(mgr.len(), 1);
}

#[tokio::test]
async fn test_create_modify_modify_then_partial_rewinds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("draft.md");
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &path, Some("v1")).await;
    mutate(&mgr, &path, Some("v2")).await;
    mutate(&mgr, &path, Some("v3")).await;

    let kinds: Vec<ChangeKind> = mgr.history(&path).iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Create, ChangeKind::Modify, ChangeKind::Modify]);

    mgr.rewind(RewindTarget::Count(2)).await;
    assert_eq!(read(&path).as_deref(), Some("v1"));
    assert_eq!(mgr.len(), 1);

    mgr.rewind(RewindTarget::Count(1)).await;
    assert!(!path.exists());
    assert!(mgr.is_empty());
}

#[tokio::test]
async fn test_failure_on_one_file_does_not_stop_others() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    let blocked_dir = dir.path().join("blocked");
    let bad = blocked_dir.join("bad.txt");
    std::fs::create_dir_all(&blocked_dir).unwrap();
    std::fs::write(&good, "g0").unwrap();
    std::fs::write(&bad, "b0").unwrap();
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &bad, Some("b1")).await;
    mutate(&mgr, &bad, Some("b2")).await;
    mutate(&mgr, &good, Some("g1")).await;

    // a directory where the file should be makes the restore fail
    std::fs::remove_file(&bad).unwrap();
    std::fs::create_dir(&bad).unwrap();

    let result = mgr.rewind(RewindTarget::All).await;

    assert!(!result.is_complete());
    assert_eq!(read(&good).as_deref(), Some("g0"));
    assert_eq!(result.reverted.len(), 1);
    // newest bad checkpoint failed, the older one was skipped
    assert_eq!(result.failed.len(), 2);
    assert!(result.failed[1].error.contains("skipped"));
    // both stay in history for a retry
    assert_eq!(mgr.history(&bad).len(), 2);

    std::fs::remove_dir(&bad).unwrap();
    let retry = mgr.rewind(RewindTarget::Path(bad.clone())).await;
    assert!(retry.is_complete());
    assert_eq!(read(&bad).as_deref(), Some("b1"));
}

#[tokio::test]
async fn test_snapshot_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let path = dir.path().join("persisted.txt");
    let mgr = CheckpointManager::new("persisted-session");

    mutate(&mgr, &path, Some("one")).await;
    mutate(&mgr, &path, Some("two")).await;
    mgr.snapshot().save(state.path()).unwrap();

    let restored = CheckpointManager::new("persisted-session");
    restored.restore(CheckpointSnapshot::load(state.path()).unwrap());
    assert_eq!(restored.len(), 2);

    restored.rewind(RewindTarget::All).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_summary_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.txt");
    let mgr = CheckpointManager::new("s");

    mutate(&mgr, &path, Some("1")).await;
    mutate(&mgr, &path, Some("2")).await;

    let summary = mgr.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.files[0].last_tool, "test_tool");

    assert_eq!(mgr.clear(), 2);
    assert!(mgr.is_empty());
    // clearing leaves the file alone
    assert_eq!(read(&path).as_deref(), Some("2"));
}
