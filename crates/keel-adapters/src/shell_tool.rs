use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_runtime::{ProcessRegistry, SpawnOptions, Tool, ToolSchemaInfo};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::info;

/// Dangerous patterns blocked regardless of config
const BUILTIN_BLOCKLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){ :|:& };:",
    "mkfs",
    "> /dev/sd",
    "> /dev/nvme",
    "dd if=",
    "chmod -R 777 /",
];

/// Shell operators that chain commands
const SHELL_OPERATORS: &[&str] = &[";", "&&", "||", "|", "`", "$(", "&"];

/// Per-stream cap on foreground output returned to the caller
const MAX_OUTPUT_BYTES: usize = 30 * 1024;

/// Runs commands under `sh -c`, in the foreground or detached through the
/// process registry.
pub struct ShellTool {
    workdir: PathBuf,
    registry: Option<Arc<ProcessRegistry>>,
    blocklist: Vec<String>,
    allowlist: Vec<String>,
}

impl ShellTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            registry: None,
            blocklist: Vec::new(),
            allowlist: Vec::new(),
        }
    }

    /// Enable `background: true`
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Configure command validation lists
    pub fn with_validation(mut self, blocklist: Vec<String>, allowlist: Vec<String>) -> Self {
        self.blocklist = blocklist;
        self.allowlist = allowlist;
        self
    }

    /// Wait for the command. No internal timeout: the dispatcher owns that,
    /// and dropping this future kills the child.
    async fn run_foreground(&self, cmd: &str) -> Result<Value> {
        info!(cmd, "Executing shell command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Command execution failed")?;

        let (stdout, stderr, status) = tokio::join!(
            read_capped(child.stdout.take()),
            read_capped(child.stderr.take()),
            child.wait(),
        );
        let status = status.context("Command execution failed")?;
        let (stdout, stdout_truncated) = stdout.context("Failed to read stdout")?;
        let (stderr, stderr_truncated) = stderr.context("Failed to read stderr")?;

        Ok(json!({
            "exit_code": status.code().unwrap_or(-1),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": stdout_truncated || stderr_truncated,
        }))
    }

    async fn run_background(&self, cmd: &str) -> Result<Value> {
        let registry = self
            .registry
            .as_ref()
            .context("Background execution is not enabled for this shell tool")?;

        info!(cmd, "Starting background shell command");
        let handle = registry
            .spawn(
                cmd,
                SpawnOptions {
                    cwd: Some(self.workdir.clone()),
                    ..SpawnOptions::default()
                },
            )
            .await?;
        let output_path = registry
            .get(&handle.id)
            .map(|p| p.output_path)
            .unwrap_or_default();

        Ok(json!({
            "process_id": handle.id,
            "pid": handle.pid,
            "output_path": output_path,
        }))
    }
}

#[async_trait]
impl Tool for ShellTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let cmd = input["cmd"].as_str().context("Input missing 'cmd' field")?;
        validate_command(cmd, &self.blocklist, &self.allowlist)?;

        if input["background"].as_bool().unwrap_or(false) {
            self.run_background(cmd).await
        } else {
            self.run_foreground(cmd).await
        }
    }

    fn name(&self) -> &str {
        "shell"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "shell".to_string(),
            description: "Run a shell command; with background=true it is detached and a process id is returned"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "cmd": { "type": "string", "description": "Shell command to execute" },
                    "background": { "type": "boolean", "description": "Detach and return immediately (default: false)" }
                },
                "required": ["cmd"]
            }),
        }
    }
}

/// Read a stream to EOF, keeping the first `MAX_OUTPUT_BYTES`. The rest is
/// read and dropped so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<(String, bool)> {
    let Some(mut reader) = reader else {
        return Ok((String::new(), false));
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = MAX_OUTPUT_BYTES.saturating_sub(kept.len());
        truncated |= n > room;
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok((String::from_utf8_lossy(&kept).into_owned(), truncated))
}

/// Validate command against blocklist and optional allowlist.
pub fn validate_command(cmd: &str, blocklist: &[String], allowlist: &[String]) -> Result<()> {
    let lowered = cmd.to_lowercase();

    if let Some(pattern) = BUILTIN_BLOCKLIST.iter().find(|p| lowered.contains(*p)) {
        anyhow::bail!("Command blocked (dangerous pattern '{}'): {}", pattern, cmd);
    }
    if let Some(pattern) = blocklist
        .iter()
        .find(|p| lowered.contains(&p.to_lowercase()))
    {
        anyhow::bail!("Command blocked (config blocklist '{}'): {}", pattern, cmd);
    }

    if allowlist.is_empty() {
        return Ok(());
    }
    let program = cmd.split_whitespace().next().unwrap_or("");
    if !allowlist.iter().any(|a| a == program) {
        anyhow::bail!(
            "Command '{}' not in allowlist. Allowed: {:?}",
            program,
            allowlist
        );
    }
    if let Some(op) = SHELL_OPERATORS.iter().find(|op| cmd.contains(*op)) {
        anyhow::bail!(
            "Command contains shell operator '{}' which is not allowed in allowlist mode",
            op
        );
    }
    Ok(())
}
