use keel_runtime::{
    KillOptions, KillSignal, ProcessConfig, ProcessRegistry, ProcessStatus, SpawnOptions,
};
use std::path::Path;
use std::time::{Duration, Instant};

fn registry(sink: &Path) -> ProcessRegistry {
    ProcessRegistry::new(&ProcessConfig {
        sink_dir: sink.to_path_buf(),
        poll_interval_ms: 20,
        ..ProcessConfig::default()
    })
}

async fn wait_for(reg: &ProcessRegistry, id: &str, wanted: ProcessStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if reg.get(id).map(|p| p.status) == Some(wanted) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("process {} never reached {:?}", id, wanted);
}

#[tokio::test]
async fn test_spawn_returns_immediately_and_captures_output() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());

    let started = Instant::now();
    let handle = reg
        .spawn("echo hello; echo oops >&2; sleep 0.2", SpawnOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(reg.get(&handle.id).unwrap().status, ProcessStatus::Running);

    wait_for(&reg, &handle.id, ProcessStatus::Completed).await;
    let info = reg.get(&handle.id).unwrap();
    assert_eq!(info.exit_code, Some(0));
    assert!(info.finished_at.is_some());
    assert_eq!(info.output_path, dir.path().join(format!("{}.log", handle.id)));

    let output = reg.read_output(&handle.id, 1024).await.unwrap();
    assert!(output.contains("hello"));
    assert!(output.contains("oops"));
}

#[tokio::test]
async fn test_spawn_honours_cwd_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());

    let mut options = SpawnOptions {
        cwd: Some(work.path().to_path_buf()),
        ..SpawnOptions::default()
    };
    options
        .env
        .push(("KEEL_TEST_VALUE".into(), "forty-two".into()));

    let handle = reg
        .spawn("pwd; echo $KEEL_TEST_VALUE", options)
        .await
        .unwrap();
    wait_for(&reg, &handle.id, ProcessStatus::Completed).await;

    let output = reg.read_output(&handle.id, 4096).await.unwrap();
    assert!(output.contains("forty-two"));
    let name = work.path().file_name().unwrap().to_str().unwrap();
    assert!(output.contains(name));
}

#[tokio::test]
async fn test_kill_completed_process_sends_no_signal() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());
    let handle = reg.spawn("true", SpawnOptions::default()).await.unwrap();
    wait_for(&reg, &handle.id, ProcessStatus::Completed).await;

    let outcome = reg.kill(&handle.id, KillOptions::default()).await.unwrap();

    assert!(outcome.is_noop());
    assert!(outcome.signals_sent.is_empty());
    assert!(!outcome.forced);
    assert_eq!(outcome.status, ProcessStatus::Completed);
}

#[tokio::test]
async fn test_graceful_kill() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());
    let handle = reg.spawn("sleep 30", SpawnOptions::default()).await.unwrap();

    let outcome = reg.kill(&handle.id, KillOptions::default()).await.unwrap();

    assert_eq!(outcome.signals_sent, vec![KillSignal::Term]);
    assert!(!outcome.forced);
    assert_eq!(outcome.status, ProcessStatus::Killed);
    assert_eq!(reg.get(&handle.id).unwrap().status, ProcessStatus::Killed);
}

#[tokio::test]
async fn test_forced_kill_when_term_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());
    let handle = reg
        .spawn("trap '' TERM; while true; do sleep 0.1; done", SpawnOptions::default())
        .await
        .unwrap();
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let options = KillOptions {
        timeout: Duration::from_millis(300),
        force_grace: Duration::from_secs(2),
        ..KillOptions::default()
    };
    let outcome = reg.kill(&handle.id, options).await.unwrap();

    assert!(outcome.forced);
    assert_eq!(outcome.signals_sent, vec![KillSignal::Term, KillSignal::Kill]);
    assert_eq!(outcome.status, ProcessStatus::Killed);
}

#[tokio::test]
async fn test_unforced_kill_reports_still_running() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());
    let handle = reg
        .spawn("trap '' TERM; while true; do sleep 0.1; done", SpawnOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = reg
        .kill(
            &handle.id,
            KillOptions {
                timeout: Duration::from_millis(200),
                force: false,
                ..KillOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!outcome.forced);
    assert_eq!(outcome.status, ProcessStatus::Running);

    // a forced follow-up finishes the job
    let outcome = reg
        .kill(
            &handle.id,
            KillOptions {
                signal: KillSignal::Kill,
                ..KillOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Killed);
}

#[tokio::test]
async fn test_list_and_kill_all() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path());
    let first = reg.spawn("sleep 30", SpawnOptions::default()).await.unwrap();
    let second = reg.spawn("sleep 30", SpawnOptions::default()).await.unwrap();

    let listed: Vec<String> = reg.list().into_iter().map(|p| p.handle.id).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first.id));
    assert!(listed.contains(&second.id));

    let outcomes = reg.kill_all().await;
    assert_eq!(outcomes.len(), 2);
    assert!(reg
        .list()
        .iter()
        .all(|p| p.status == ProcessStatus::Killed));
}
