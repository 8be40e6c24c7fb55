use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Hook lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    /// Before tool execution; the only phase that can veto
    BeforeTool,
    /// After a tool call succeeded
    AfterTool,
    /// After a tool call failed (execution error or timeout)
    AfterToolFailure,
    PromptSubmitted,
    AttentionNeeded,
    TurnStop,
    SessionStart,
    SubTaskStop,
}

impl HookEvent {
    pub const ALL: [HookEvent; 8] = [
        HookEvent::BeforeTool,
        HookEvent::AfterTool,
        HookEvent::AfterToolFailure,
        HookEvent::PromptSubmitted,
        HookEvent::AttentionNeeded,
        HookEvent::TurnStop,
        HookEvent::SessionStart,
        HookEvent::SubTaskStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeTool => "before-tool",
            HookEvent::AfterTool => "after-tool",
            HookEvent::AfterToolFailure => "after-tool-failure",
            HookEvent::PromptSubmitted => "prompt-submitted",
            HookEvent::AttentionNeeded => "attention-needed",
            HookEvent::TurnStop => "turn-stop",
            HookEvent::SessionStart => "session-start",
            HookEvent::SubTaskStop => "sub-task-stop",
        }
    }

    /// Events carrying a tool name, so matchers apply
    pub fn is_tool_scoped(&self) -> bool {
        matches!(
            self,
            HookEvent::BeforeTool | HookEvent::AfterTool | HookEvent::AfterToolFailure
        )
    }

    /// Whether a block outcome stops the underlying action
    pub fn can_block(&self) -> bool {
        matches!(self, HookEvent::BeforeTool)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown hook event: {}", s))
    }
}

/// Context passed to hooks on event trigger
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub tool_name: Option<String>,
    pub call_id: Option<String>,
    pub tool_input: Option<Value>,
    /// Present for after-phase events
    pub tool_result: Option<Value>,
    pub session_id: String,
    pub cwd: PathBuf,
    /// Free-form data for non-tool events (prompt text, sub-task id, ...)
    pub extra: Option<Value>,
}

impl HookContext {
    pub fn new(session_id: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    pub fn for_tool(mut self, call_id: &str, tool_name: &str, input: &Value) -> Self {
        self.call_id = Some(call_id.to_string());
        self.tool_name = Some(tool_name.to_string());
        self.tool_input = Some(input.clone());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Structured payload written to the hook's stdin
    pub fn payload(&self, event: HookEvent) -> Value {
        json!({
            "event": event.as_str(),
            "session_id": self.session_id,
            "cwd": self.cwd,
            "call_id": self.call_id,
            "tool_name": self.tool_name,
            "tool_input": self.tool_input,
            "tool_result": self.tool_result,
            "extra": self.extra,
        })
    }
}

/// Classification derived from a hook's exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookOutcome {
    Allow,
    Block,
    Warn,
}

impl HookOutcome {
    /// 0 allows, 2 blocks, anything else warns but allows
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => HookOutcome::Allow,
            2 => HookOutcome::Block,
            _ => HookOutcome::Warn,
        }
    }
}

/// Result of running one hook command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookInvocationResult {
    pub hook_id: String,
    pub event: HookEvent,
    pub command: String,
    pub success: bool,
    pub outcome: HookOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Either stream hit the capture cap
    pub truncated: bool,
    /// Spawn failure or timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl HookInvocationResult {
    /// Text surfaced to the caller for a block or warning
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        if let Some(error) = &self.error {
            return error.clone();
        }
        match self.exit_code {
            Some(code) => format!("hook '{}' exited with code {}", self.command, code),
            None => format!("hook '{}' failed", self.command),
        }
    }

    pub(crate) fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_classification() {
        assert_eq!(HookOutcome::from_exit_code(0), HookOutcome::Allow);
        assert_eq!(HookOutcome::from_exit_code(2), HookOutcome::Block);
        assert_eq!(HookOutcome::from_exit_code(1), HookOutcome::Warn);
        assert_eq!(HookOutcome::from_exit_code(127), HookOutcome::Warn);
        assert_eq!(HookOutcome::from_exit_code(-1), HookOutcome::Warn);
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json, event.as_str());
        }
        assert!("before_tool".parse::<HookEvent>().is_err());
    }

    #[test]
    fn test_only_before_tool_blocks() {
        let blocking: Vec<_> = HookEvent::ALL.into_iter().filter(|e| e.can_block()).collect();
        assert_eq!(blocking, vec![HookEvent::BeforeTool]);
    }
}
