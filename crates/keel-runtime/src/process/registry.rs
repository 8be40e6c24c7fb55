use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};
use uuid::Uuid;

use super::signal;
use super::types::{
    BackgroundProcess, KillOptions, KillOutcome, KillSignal, ProcessHandle, ProcessStatus,
    RegistryError, SpawnOptions,
};
use crate::config::ProcessConfig;

struct Entry {
    info: BackgroundProcess,
    /// Set while a kill is in progress so the monitor records `Killed`
    kill_requested: bool,
    finished: Option<Instant>,
}

impl Entry {
    /// Forward-only, idempotent status change
    fn settle(&mut self, status: ProcessStatus, exit_code: Option<i32>) -> bool {
        if !self.info.status.can_transition_to(status) {
            return false;
        }
        self.info.status = status;
        self.info.exit_code = exit_code;
        self.info.finished_at = Some(Utc::now());
        self.finished = Some(Instant::now());
        true
    }
}

/// Session-scoped store of detached background processes.
///
/// Only processes spawned through this registry can be looked up or killed.
/// Each child is owned by a monitor task; the registry keeps just the pid.
pub struct ProcessRegistry {
    entries: Arc<DashMap<String, Entry>>,
    sink_dir: PathBuf,
    retention: Duration,
    poll_interval: Duration,
    kill_defaults: KillOptions,
}

impl ProcessRegistry {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sink_dir: config.sink_dir.clone(),
            retention: config.retention(),
            poll_interval: config.poll_interval(),
            kill_defaults: KillOptions {
                timeout: config.kill_timeout(),
                force_grace: config.force_grace(),
                ..KillOptions::default()
            },
        }
    }

    /// Kill options derived from configuration
    pub fn kill_defaults(&self) -> KillOptions {
        self.kill_defaults.clone()
    }

    pub fn sink_dir(&self) -> &Path {
        &self.sink_dir
    }

    /// Start `command` under `sh -c` in its own process group, with stdout
    /// and stderr redirected to `<sink_dir>/<id>.log`. Returns immediately.
    pub async fn spawn(
        &self,
        command: &str,
        options: SpawnOptions,
    ) -> Result<ProcessHandle, RegistryError> {
        self.prune_expired();
        tokio::fs::create_dir_all(&self.sink_dir).await?;

        let id = format!("bg-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let output_path = self.sink_dir.join(format!("{}.log", id));
        let sink = std::fs::File::create(&output_path)?;
        let sink_err = sink.try_clone()?;

        let mut std_cmd = std::process::Command::new("sh");
        std_cmd
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .stderr(Stdio::from(sink_err));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        if let Some(cwd) = &options.cwd {
            std_cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            std_cmd.env(key, value);
        }

        let mut child = tokio::process::Command::from(std_cmd)
            .spawn()
            .map_err(|source| RegistryError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let pid = child.id().ok_or_else(|| RegistryError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other("child exited before pid was read"),
        })?;

        let handle = ProcessHandle {
            id: id.clone(),
            pid,
        };
        self.entries.insert(
            id.clone(),
            Entry {
                info: BackgroundProcess {
                    handle: handle.clone(),
                    command: command.to_string(),
                    started_at: Utc::now(),
                    status: ProcessStatus::Running,
                    exit_code: None,
                    finished_at: None,
                    output_path,
                },
                kill_requested: false,
                finished: None,
            },
        );

        info!(id = %id, pid, command, "Spawned background process");

        let entries = self.entries.clone();
        tokio::spawn(async move {
            let waited = child.wait().await;
            let Some(mut entry) = entries.get_mut(&id) else {
                return;
            };
            let (status, exit_code) = match waited {
                Ok(_) if entry.kill_requested => (ProcessStatus::Killed, None),
                Ok(exit) => match exit.code() {
                    Some(code) => (ProcessStatus::Completed, Some(code)),
                    // Terminated by a signal nobody in this registry sent
                    None => (ProcessStatus::Errored, None),
                },
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed waiting on background process");
                    (ProcessStatus::Errored, None)
                }
            };
            if entry.settle(status, exit_code) {
                info!(id = %id, status = ?status, exit_code, "Background process finished");
            }
        });

        Ok(handle)
    }

    /// Terminate a registry process: `options.signal`, wait up to
    /// `options.timeout`, then SIGKILL and wait `options.force_grace` when
    /// `options.force` is set.
    ///
    /// Killing a process that is no longer running is a successful no-op.
    pub async fn kill(&self, id: &str, options: KillOptions) -> Result<KillOutcome, RegistryError> {
        let handle = {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if entry.info.status.is_terminal() {
                return Ok(KillOutcome {
                    handle: entry.info.handle.clone(),
                    signals_sent: Vec::new(),
                    forced: false,
                    status: entry.info.status,
                });
            }
            entry.kill_requested = true;
            entry.info.handle.clone()
        };

        let mut signals_sent = Vec::new();
        info!(id, pid = handle.pid, signal = ?options.signal, "Sending signal to background process");
        let delivered = match signal::send(handle.pid, options.signal) {
            Ok(delivered) => delivered,
            Err(e) => {
                // nothing was delivered, so a later exit is not ours
                self.withdraw_kill(id);
                return Err(e);
            }
        };
        if delivered {
            signals_sent.push(options.signal);
        } else {
            // Exited between lookup and delivery; let the monitor record it as completed
            self.withdraw_kill(id);
            let status = self.wait_for_exit(id, options.timeout).await;
            return Ok(KillOutcome {
                handle,
                signals_sent,
                forced: false,
                status,
            });
        }

        let status = self.wait_for_exit(id, options.timeout).await;
        if status.is_terminal() || !options.force {
            return Ok(KillOutcome {
                handle,
                signals_sent,
                forced: false,
                status,
            });
        }

        warn!(id, pid = handle.pid, "Process ignored graceful signal, sending SIGKILL");
        if signal::send(handle.pid, KillSignal::Kill)? {
            signals_sent.push(KillSignal::Kill);
        }

        let mut status = self.wait_for_exit(id, options.force_grace).await;
        if !status.is_terminal() {
            warn!(id, pid = handle.pid, "Process still present after SIGKILL, marking killed");
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.settle(ProcessStatus::Killed, None);
                status = entry.info.status;
            }
        }

        Ok(KillOutcome {
            handle,
            signals_sent,
            forced: true,
            status,
        })
    }

    /// Kill every running process with the registry's default options
    pub async fn kill_all(&self) -> Vec<Result<KillOutcome, RegistryError>> {
        let running: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.info.status == ProcessStatus::Running)
            .map(|e| e.key().clone())
            .collect();

        let mut outcomes = Vec::with_capacity(running.len());
        for id in running {
            outcomes.push(self.kill(&id, self.kill_defaults()).await);
        }
        outcomes
    }

    pub fn get(&self, id: &str) -> Option<BackgroundProcess> {
        self.entries.get(id).map(|e| e.info.clone())
    }

    /// All tracked processes, oldest first
    pub fn list(&self) -> Vec<BackgroundProcess> {
        self.prune_expired();
        let mut all: Vec<BackgroundProcess> =
            self.entries.iter().map(|e| e.info.clone()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// Last `max_bytes` of a process's captured output
    pub async fn read_output(&self, id: &str, max_bytes: u64) -> Result<String, RegistryError> {
        let path = self
            .get(id)
            .map(|p| p.output_path)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let mut file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        if len > max_bytes {
            file.seek(std::io::SeekFrom::Start(len - max_bytes)).await?;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Drop terminal entries older than the retention period.
    /// Running entries are never removed.
    pub fn prune_expired(&self) -> usize {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries.retain(|_, e| match e.finished {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - self.entries.len()
    }

    fn withdraw_kill(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.kill_requested = false;
        }
    }

    async fn wait_for_exit(&self, id: &str, timeout: Duration) -> ProcessStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self
                .entries
                .get(id)
                .map(|e| e.info.status)
                .unwrap_or(ProcessStatus::Killed);
            if status.is_terminal() || Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &Path) -> ProcessRegistry {
        ProcessRegistry::new(&ProcessConfig {
            sink_dir: dir.to_path_buf(),
            poll_interval_ms: 20,
            retention_secs: 0,
            ..ProcessConfig::default()
        })
    }

    async fn wait_terminal(reg: &ProcessRegistry, id: &str) -> ProcessStatus {
        reg.wait_for_exit(id, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn test_completed_process_keeps_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let handle = reg.spawn("exit 3", SpawnOptions::default()).await.unwrap();

        assert_eq!(wait_terminal(&reg, &handle.id).await, ProcessStatus::Completed);
        assert_eq!(reg.get(&handle.id).unwrap().exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_failed_signal_leaves_exit_as_completed() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let handle = reg.spawn("sleep 0.5", SpawnOptions::default()).await.unwrap();
        // a group id killpg rejects with EINVAL
        reg.entries.get_mut(&handle.id).unwrap().info.handle.pid = u32::MAX;

        let err = reg.kill(&handle.id, KillOptions::default()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Signal { .. }));
        assert!(!reg.entries.get(&handle.id).unwrap().kill_requested);

        assert_eq!(wait_terminal(&reg, &handle.id).await, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn test_prune_never_removes_running() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let running = reg.spawn("sleep 30", SpawnOptions::default()).await.unwrap();
        let done = reg.spawn("true", SpawnOptions::default()).await.unwrap();
        wait_terminal(&reg, &done.id).await;

        // retention is zero, so the finished entry goes and the running one stays
        assert_eq!(reg.prune_expired(), 1);
        assert!(reg.get(&running.id).is_some());
        assert!(reg.get(&done.id).is_none());

        reg.kill(&running.id, KillOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let err = reg.kill("bg-missing", KillOptions::default()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        assert!(reg.read_output("bg-missing", 10).await.is_err());
    }
}
