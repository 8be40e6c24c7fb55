use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema advertised to the model and used for input validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchemaInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema object (`properties` + `required`)
    pub parameters: Value,
}

/// A callable tool. Stored as `Arc<dyn Tool>` in the dispatcher.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute tool with input, returns result
    async fn execute(&self, input: Value) -> Result<Value>;

    /// Tool name for registration
    fn name(&self) -> &str;

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: self.name().to_string(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    /// Absolute paths this call may create, modify or delete.
    ///
    /// The dispatcher snapshots these before execution and hands the
    /// before/after pair to the checkpoint manager. Tools that never touch
    /// the filesystem keep the default.
    fn mutation_targets(&self, _input: &Value) -> Vec<PathBuf> {
        Vec::new()
    }
}
