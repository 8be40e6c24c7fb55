use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use keel_runtime::{write_atomic, Tool, ToolSchemaInfo};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::workspace_guard::WorkspaceGuard;

/// Exact-string replacement inside one file
pub struct EditFileTool {
    guard: Arc<WorkspaceGuard>,
}

impl EditFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let requested = input["path"]
            .as_str()
            .context("Missing required field 'path'")?;
        let old_string = input["old_string"]
            .as_str()
            .context("Missing required field 'old_string'")?;
        let new_string = input["new_string"]
            .as_str()
            .context("Missing required field 'new_string'")?;
        let replace_all = input["replace_all"].as_bool().unwrap_or(false);

        if old_string.is_empty() {
            bail!("old_string must not be empty");
        }
        if old_string == new_string {
            bail!("old_string and new_string are identical");
        }

        let path = self.guard.resolve_existing(requested)?;
        self.guard.check_size(&path).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .context(format!("Failed to read {}", requested))?;
        let content = WorkspaceGuard::decode_text(bytes, requested)?;

        let replacements = match (content.matches(old_string).count(), replace_all) {
            (0, _) => bail!("old_string not found in {}", requested),
            (n, false) if n > 1 => bail!(
                "old_string occurs {} times in {}; pass replace_all=true or add surrounding context",
                n,
                requested
            ),
            (n, true) => n,
            (_, false) => 1,
        };

        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };
        write_atomic(&path, updated.as_bytes()).await?;

        Ok(json!({
            "path": self.guard.display(&path),
            "replacements": replacements,
        }))
    }

    fn name(&self) -> &str {
        "edit_file"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "edit_file".to_string(),
            description: "Replace an exact string in a file".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to workspace" },
                    "old_string": { "type": "string", "description": "Exact text to find" },
                    "new_string": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence (default: false)" }
                },
                "required": ["path", "old_string", "new_string"]
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
