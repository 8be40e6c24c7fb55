//! Engine configuration, deserialized from the `[engine]` section of the CLI config.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub hooks: HookDefaults,

    #[serde(default)]
    pub processes: ProcessConfig,

    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

/// Batch scheduling limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Max calls in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-call timeout applied when a tool has no override
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Cancel unstarted calls after the first failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Per-tool timeout overrides (tool name -> seconds)
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookDefaults {
    /// Timeout for hooks that don't declare one
    #[serde(default = "default_hook_timeout")]
    pub default_timeout_secs: u64,

    /// Per-stream capture cap for hook stdout/stderr
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    /// Directory holding `<id>.log` output sinks for background processes
    #[serde(default = "default_sink_dir")]
    pub sink_dir: PathBuf,

    /// Window after the graceful signal before escalating
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,

    /// Window after the forced signal before giving up
    #[serde(default = "default_force_grace")]
    pub force_grace_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long terminal entries stay listed
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_call_timeout() -> u64 {
    30
}

fn default_hook_timeout() -> u64 {
    60
}

fn default_output_cap() -> usize {
    30 * 1024
}

fn default_sink_dir() -> PathBuf {
    std::env::temp_dir().join("keel-processes")
}

fn default_kill_timeout() -> u64 {
    5_000
}

fn default_force_grace() -> u64 {
    2_000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_retention() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            call_timeout_secs: default_call_timeout(),
            fail_fast: false,
            tool_timeouts: HashMap::new(),
        }
    }
}

impl Default for HookDefaults {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_hook_timeout(),
            output_cap_bytes: default_output_cap(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            sink_dir: default_sink_dir(),
            kill_timeout_ms: default_kill_timeout(),
            force_grace_ms: default_force_grace(),
            poll_interval_ms: default_poll_interval(),
            retention_secs: default_retention(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl HookDefaults {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl ProcessConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn force_grace(&self) -> Duration {
        Duration::from_millis(self.force_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
