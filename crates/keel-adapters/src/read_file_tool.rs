use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_runtime::{Tool, ToolSchemaInfo};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::workspace_guard::WorkspaceGuard;

/// Reads a text file as numbered lines, optionally windowed
pub struct ReadFileTool {
    guard: Arc<WorkspaceGuard>,
}

impl ReadFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let requested = input["path"]
            .as_str()
            .context("Missing required field 'path'")?;
        let offset = input["offset"].as_u64().unwrap_or(0) as usize;
        let limit = input["limit"].as_u64().unwrap_or(0) as usize;

        let path = self.guard.resolve_existing(requested)?;
        let size = self.guard.check_size(&path).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .context(format!("Failed to read {}", requested))?;
        let text = WorkspaceGuard::decode_text(bytes, requested)?;

        let total_lines = text.lines().count();
        let start = offset.min(total_lines);
        let take = if limit == 0 { usize::MAX } else { limit };

        let mut shown = 0;
        let mut content = String::new();
        for (n, line) in text.lines().enumerate().skip(start).take(take) {
            if shown > 0 {
                content.push('\n');
            }
            content.push_str(&format!("{:>6}\t{}", n + 1, line));
            shown += 1;
        }

        Ok(json!({
            "path": self.guard.display(&path),
            "content": content,
            "total_lines": total_lines,
            "lines_shown": shown,
            "offset": start,
            "size_bytes": size,
        }))
    }

    fn name(&self) -> &str {
        "read_file"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "read_file".to_string(),
            description: "Read a text file with optional line offset and limit".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to workspace" },
                    "offset": { "type": "integer", "description": "Line offset (0-based)" },
                    "limit": { "type": "integer", "description": "Max lines to read (0 = all)" }
                },
                "required": ["path"]
            }),
        }
    }
}
