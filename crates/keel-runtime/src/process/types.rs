use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a registry-spawned process. The id is what callers pass back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub id: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Killed,
    Errored,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }

    /// Status only moves forward out of `Running`
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        *self == ProcessStatus::Running && next.is_terminal()
    }
}

/// Registry view of a detached process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundProcess {
    pub handle: ProcessHandle,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Combined stdout/stderr sink
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KillSignal {
    #[default]
    #[serde(alias = "SIGTERM")]
    Term,
    #[serde(alias = "SIGKILL")]
    Kill,
    #[serde(alias = "SIGINT")]
    Int,
    #[serde(alias = "SIGHUP")]
    Hup,
}

#[derive(Debug, Clone)]
pub struct KillOptions {
    pub signal: KillSignal,
    /// How long to wait for exit after the first signal
    pub timeout: Duration,
    /// Escalate to SIGKILL when the process outlives `timeout`
    pub force: bool,
    /// How long to wait after SIGKILL before reporting killed anyway
    pub force_grace: Duration,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            signal: KillSignal::Term,
            timeout: Duration::from_secs(5),
            force: true,
            force_grace: Duration::from_secs(2),
        }
    }
}

/// What a kill request did
#[derive(Debug, Clone, Serialize)]
pub struct KillOutcome {
    pub handle: ProcessHandle,
    /// Signals actually sent, in order. Empty for a no-op kill.
    pub signals_sent: Vec<KillSignal>,
    /// SIGKILL escalation happened
    pub forced: bool,
    pub status: ProcessStatus,
}

impl KillOutcome {
    pub fn is_noop(&self) -> bool {
        self.signals_sent.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no background process with id '{0}'")]
    NotFound(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
