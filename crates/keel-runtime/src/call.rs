//! Tool call and result types exchanged with the agent loop.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single model-issued tool invocation. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within one agent turn
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            input,
        }
    }
}

/// Why a call failed. Every failure carries exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Malformed input or unknown tool; never dispatched
    Validation,
    /// The tool ran and returned an error
    Execution,
    /// The call exceeded its time budget
    Timeout,
    /// A before-tool hook vetoed the call
    Blocked,
    /// Fail-fast aggregation skipped the call before it started
    Cancelled,
}

/// Outcome of one ToolCall. Produced exactly once per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub duration_ms: u64,
    /// Engine-attached details: hook warnings, checkpoint ids, timeout budget.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: Value, duration: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            success: true,
            output: Some(output),
            error: None,
            error_kind: None,
            duration_ms: duration.as_millis() as u64,
            metadata: Map::new(),
        }
    }

    pub fn failed(
        call: &ToolCall,
        kind: ToolErrorKind,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            duration_ms: duration.as_millis() as u64,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_kind(&self, kind: ToolErrorKind) -> bool {
        self.error_kind == Some(kind)
    }
}

/// Counts across a batch, for the user-visible summary line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<ToolErrorKind, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[ToolResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            if result.success {
                summary.succeeded += 1;
                continue;
            }
            summary.failed += 1;
            if let Some(kind) = result.error_kind {
                *summary.failures_by_kind.entry(kind).or_default() += 1;
            }
        }
        summary
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} calls: {} succeeded, {} failed",
            self.total, self.succeeded, self.failed
        )?;
        if !self.failures_by_kind.is_empty() {
            let parts: Vec<String> = self
                .failures_by_kind
                .iter()
                .map(|(kind, n)| format!("{:?}={}", kind, n).to_lowercase())
                .collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_counts_by_kind() {
        let call = ToolCall::new("1", "read_file", json!({}));
        let results = vec![
            ToolResult::ok(&call, json!({}), Duration::ZERO),
            ToolResult::failed(&call, ToolErrorKind::Timeout, "slow", Duration::ZERO),
            ToolResult::failed(&call, ToolErrorKind::Timeout, "slow", Duration::ZERO),
            ToolResult::failed(&call, ToolErrorKind::Blocked, "no", Duration::ZERO),
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.failures_by_kind[&ToolErrorKind::Timeout], 2);
        assert_eq!(
            summary.to_string(),
            "4 calls: 1 succeeded, 3 failed (timeout=2, blocked=1)"
        );
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let call = ToolCall::new("a", "write_file", json!({"path": "x"}));
        let value = serde_json::to_value(ToolResult::ok(&call, json!({"ok": true}), Duration::ZERO))
            .unwrap();
        assert!(value.get("error").is_none());
        assert!(value.get("metadata").is_none());
        assert_eq!(value["call_id"], "a");
    }
}
