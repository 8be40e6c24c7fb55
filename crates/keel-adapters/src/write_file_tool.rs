use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_runtime::{write_atomic, Tool, ToolSchemaInfo};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::workspace_guard::WorkspaceGuard;

pub struct WriteFileTool {
    guard: Arc<WorkspaceGuard>,
}

impl WriteFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let requested = input["path"]
            .as_str()
            .context("Missing required field 'path'")?;
        let content = input["content"]
            .as_str()
            .context("Missing required field 'content'")?;

        self.guard.check_len(content.len() as u64)?;
        let path = self.guard.resolve(requested)?;
        let existed = path.exists();

        write_atomic(&path, content.as_bytes()).await?;

        Ok(json!({
            "path": self.guard.display(&path),
            "bytes_written": content.len(),
            "created": !existed,
        }))
    }

    fn name(&self) -> &str {
        "write_file"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "write_file".to_string(),
            description: "Create or overwrite a file atomically".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to workspace" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn mutation_targets(&self, input: &Value) -> Vec<PathBuf> {
        input["path"]
            .as_str()
            .and_then(|p| self.guard.resolve(p).ok())
            .into_iter()
            .collect()
    }
}
