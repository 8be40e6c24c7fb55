//! Tools that expose the process registry to the model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_runtime::{KillSignal, ProcessRegistry, Tool, ToolSchemaInfo};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TAIL_BYTES: u64 = 4096;

/// Terminates a background process started by the shell tool
pub struct KillProcessTool {
    registry: Arc<ProcessRegistry>,
}

impl KillProcessTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for KillProcessTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let id = input["process_id"]
            .as_str()
            .context("Missing required field 'process_id'")?;

        let mut options = self.registry.kill_defaults();
        if let Some(signal) = input.get("signal").filter(|v| !v.is_null()) {
            options.signal = serde_json::from_value::<KillSignal>(signal.clone())
                .context("signal must be one of TERM, KILL, INT, HUP")?;
        }
        if let Some(ms) = input["timeout_ms"].as_u64() {
            options.timeout = Duration::from_millis(ms);
        }
        if let Some(force) = input["force"].as_bool() {
            options.force = force;
        }

        let outcome = self.registry.kill(id, options).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    fn name(&self) -> &str {
        "kill_process"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "kill_process".to_string(),
            description: "Stop a background process: graceful signal first, SIGKILL if it lingers"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "process_id": { "type": "string", "description": "Id returned by shell with background=true" },
                    "signal": { "type": "string", "description": "TERM (default), KILL, INT or HUP" },
                    "timeout_ms": { "type": "integer", "description": "Grace period before escalation" },
                    "force": { "type": "boolean", "description": "Escalate to SIGKILL after the grace period (default: true)" }
                },
                "required": ["process_id"]
            }),
        }
    }
}

/// Status and recent output of background processes
pub struct ProcessStatusTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcessStatusTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ProcessStatusTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let Some(id) = input["process_id"].as_str() else {
            return Ok(json!({ "processes": self.registry.list() }));
        };

        let process = self
            .registry
            .get(id)
            .context(format!("No background process with id '{}'", id))?;
        let tail = input["tail_bytes"].as_u64().unwrap_or(DEFAULT_TAIL_BYTES);
        let output = self.registry.read_output(id, tail).await?;

        Ok(json!({
            "process": process,
            "output": output,
        }))
    }

    fn name(&self) -> &str {
        "process_status"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "process_status".to_string(),
            description: "List background processes, or show one process with the tail of its output"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "process_id": { "type": "string", "description": "Omit to list all processes" },
                    "tail_bytes": { "type": "integer", "description": "Bytes of output to return (default 4096)" }
                }
            }),
        }
    }
}
