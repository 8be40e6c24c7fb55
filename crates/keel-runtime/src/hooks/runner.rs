//! Runs a single hook command as an isolated child process.
//!
//! The command template is tokenized at load time; placeholders are
//! substituted into individual argv entries, so context values are always
//! passed as opaque arguments and never reach a shell. The same context is
//! exposed as `KEEL_*` environment variables and as JSON on stdin.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::signal;
use crate::process::KillSignal;

use super::config::HookDefinition;
use super::events::{HookContext, HookEvent, HookInvocationResult, HookOutcome};

/// Default per-stream capture cap
pub const DEFAULT_OUTPUT_CAP: usize = 30 * 1024;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long output may keep arriving once the hook itself has exited
const DRAIN_GRACE: Duration = Duration::from_millis(500);

struct Captured {
    text: String,
    truncated: bool,
}

/// Run `hook` for `event`. Never fails: spawn errors and timeouts are
/// encoded in the returned result.
///
/// The verdict comes from the hook's own exit status. Each hook runs in
/// its own process group, which is killed once the hook exits or times out.
pub async fn run_hook(
    hook: &HookDefinition,
    event: HookEvent,
    ctx: &HookContext,
    output_cap: usize,
) -> HookInvocationResult {
    let start = Instant::now();
    let argv = substitute(&hook.argv, event, ctx);
    let payload = ctx.payload(event).to_string();

    debug!(hook = %hook.id, event = %event, argv = ?argv, "Running hook");

    let child = match spawn(&argv, event, ctx) {
        Ok(child) => child,
        Err(e) => {
            warn!(hook = %hook.id, error = %e, "Hook failed to run");
            let mut result = failure(hook, event, format!("failed to run hook: {}", e));
            result.set_duration(start.elapsed());
            return result;
        }
    };
    let group = child.id();

    let run = collect(child, payload, output_cap);
    let mut result = match tokio::time::timeout(hook.timeout, run).await {
        Ok(Ok((exit_code, stdout, stderr))) => {
            let outcome = match exit_code {
                Some(code) => HookOutcome::from_exit_code(code),
                None => HookOutcome::Warn,
            };
            HookInvocationResult {
                hook_id: hook.id.clone(),
                event,
                command: hook.command.clone(),
                success: exit_code == Some(0),
                outcome,
                exit_code,
                truncated: stdout.truncated || stderr.truncated,
                stdout: stdout.text,
                stderr: stderr.text,
                error: exit_code.is_none().then(|| "hook terminated by signal".to_string()),
                duration_ms: 0,
            }
        }
        Ok(Err(e)) => {
            warn!(hook = %hook.id, error = %e, "Hook failed to run");
            failure(hook, event, format!("failed to run hook: {}", e))
        }
        Err(_) => {
            if let Some(pid) = group {
                kill_group(pid);
            }
            warn!(
                hook = %hook.id,
                timeout_ms = hook.timeout.as_millis() as u64,
                "Hook timed out"
            );
            failure(
                hook,
                event,
                format!("hook timed out after {}ms", hook.timeout.as_millis()),
            )
        }
    };
    result.set_duration(start.elapsed());
    result
}

fn failure(hook: &HookDefinition, event: HookEvent, error: String) -> HookInvocationResult {
    HookInvocationResult {
        hook_id: hook.id.clone(),
        event,
        command: hook.command.clone(),
        success: false,
        outcome: if hook.block_on_error {
            HookOutcome::Block
        } else {
            HookOutcome::Warn
        },
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        truncated: false,
        error: Some(error),
        duration_ms: 0,
    }
}

/// Replace `{placeholder}` tokens inside each argv entry
fn substitute(argv: &[String], event: HookEvent, ctx: &HookContext) -> Vec<String> {
    let cwd = ctx.cwd.to_string_lossy();
    let vars: [(&str, &str); 5] = [
        ("event", event.as_str()),
        ("tool_name", ctx.tool_name.as_deref().unwrap_or("")),
        ("call_id", ctx.call_id.as_deref().unwrap_or("")),
        ("session_id", &ctx.session_id),
        ("cwd", &cwd),
    ];
    argv.iter().map(|arg| expand(arg, &vars)).collect()
}

/// One left-to-right pass. Substituted values are never rescanned, and
/// unknown `{names}` are left as they are.
fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn spawn(argv: &[String], event: HookEvent, ctx: &HookContext) -> std::io::Result<Child> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("KEEL_HOOK_EVENT", event.as_str())
        .env("KEEL_SESSION_ID", &ctx.session_id)
        .env("KEEL_CWD", &ctx.cwd);

    // own group, so anything the hook starts can be killed with it
    #[cfg(unix)]
    cmd.process_group(0);

    if ctx.cwd.is_dir() {
        cmd.current_dir(&ctx.cwd);
    }
    if let Some(name) = &ctx.tool_name {
        cmd.env("KEEL_TOOL_NAME", name);
    }
    if let Some(id) = &ctx.call_id {
        cmd.env("KEEL_CALL_ID", id);
    }
    if let Some(input) = &ctx.tool_input {
        cmd.env("KEEL_TOOL_INPUT", input.to_string());
    }
    if let Some(result) = &ctx.tool_result {
        cmd.env("KEEL_TOOL_RESULT", result.to_string());
    }

    cmd.spawn()
}

/// Feed the payload, capture output and wait for exit.
///
/// Output is read until EOF, or for at most `DRAIN_GRACE` after the hook
/// exits: a descendant that escaped the group may still hold the pipes.
async fn collect(
    mut child: Child,
    payload: String,
    output_cap: usize,
) -> std::io::Result<(Option<i32>, Captured, Captured)> {
    let exited = CancellationToken::new();
    let group = child.id();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let write_payload = async {
        if let Some(mut stdin) = stdin {
            let write = async {
                // Hooks that never read stdin close the pipe early
                let _ = stdin.write_all(payload.as_bytes()).await;
                let _ = stdin.shutdown().await;
            };
            tokio::select! {
                _ = write => {}
                _ = exited.cancelled() => {}
            }
        }
    };

    let wait = async {
        let status = child.wait().await;
        if let Some(pid) = group {
            kill_group(pid);
        }
        exited.cancel();
        status
    };

    let (_, stdout, stderr, status) = tokio::join!(
        write_payload,
        read_capped(stdout, output_cap, exited.clone()),
        read_capped(stderr, output_cap, exited.clone()),
        wait,
    );

    Ok((status?.code(), stdout?, stderr?))
}

/// SIGKILL whatever is left of a hook's process group
fn kill_group(pid: u32) {
    match signal::send(pid, KillSignal::Kill) {
        Ok(true) => debug!(pid, "Killed leftover hook processes"),
        Ok(false) => {}
        Err(e) => debug!(pid, error = %e, "Could not signal hook process group"),
    }
}

/// Drain `reader`, keeping at most `cap` bytes.
///
/// Draining past the cap keeps the child from stalling on a full pipe.
/// Once `exited` fires, reading stops at EOF or after `DRAIN_GRACE`.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
    exited: CancellationToken,
) -> std::io::Result<Captured> {
    let Some(mut reader) = reader else {
        return Ok(Captured {
            text: String::new(),
            truncated: false,
        });
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    let mut deadline = None;
    loop {
        let n = if exited.is_cancelled() {
            let deadline =
                *deadline.get_or_insert_with(|| tokio::time::Instant::now() + DRAIN_GRACE);
            match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
                Ok(n) => n?,
                Err(_) => {
                    debug!("Hook output still open after exit, stopped reading");
                    break;
                }
            }
        } else {
            tokio::select! {
                n = reader.read(&mut buf) => n?,
                _ = exited.cancelled() => continue,
            }
        };
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    Ok(Captured { text, truncated })
}
