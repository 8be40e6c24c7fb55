use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use keel_runtime::{Tool, ToolSchemaInfo};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::workspace_guard::{looks_binary, WorkspaceGuard};

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_DEPTH: usize = 16;
/// Directories never worth searching
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

#[derive(Debug, Serialize)]
struct SearchMatch {
    path: String,
    line: usize,
    text: String,
}

/// Regex search over workspace files
pub struct SearchTool {
    guard: Arc<WorkspaceGuard>,
}

impl SearchTool {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for SearchTool {
    async fn execute(&self, input: Value) -> Result<Value> {
        let pattern = input["pattern"]
            .as_str()
            .context("Missing required field 'pattern'")?;
        let regex =
            Regex::new(pattern).with_context(|| format!("Invalid regex pattern: {}", pattern))?;
        let glob = input["glob"].as_str().map(compile_glob).transpose()?;
        let max_results = input["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);
        let start = self.guard.resolve(input["path"].as_str().unwrap_or("."))?;

        let guard = self.guard.clone();
        // walkdir is synchronous
        let (matches, files_searched, truncated) = tokio::task::spawn_blocking(move || {
            search(&guard, &start, &regex, glob.as_ref(), max_results)
        })
        .await
        .context("Search task failed")?;

        Ok(json!({
            "matches": matches,
            "files_searched": files_searched,
            "truncated": truncated,
        }))
    }

    fn name(&self) -> &str {
        "search"
    }

    fn schema(&self) -> ToolSchemaInfo {
        ToolSchemaInfo {
            name: "search".to_string(),
            description: "Search workspace files for a regex; returns path, line number and text"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "path": { "type": "string", "description": "File or directory to search (default: workspace root)" },
                    "glob": { "type": "string", "description": "Only search files matching this glob, e.g. \"*.rs\"" },
                    "max_results": { "type": "integer", "description": "Stop after this many matches (default 100)" }
                },
                "required": ["pattern"]
            }),
        }
    }
}

fn search(
    guard: &WorkspaceGuard,
    start: &Path,
    regex: &Regex,
    glob: Option<&Pattern>,
    max_results: usize,
) -> (Vec<SearchMatch>, usize, bool) {
    let mut matches = Vec::new();
    let mut files_searched = 0;

    let walker = WalkDir::new(start)
        .max_depth(MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = guard.display(entry.path());
        if glob.is_some_and(|g| !g.matches_with(&relative, GLOB_OPTIONS)) {
            continue;
        }

        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if looks_binary(&bytes) {
            continue;
        }
        files_searched += 1;

        let text = String::from_utf8_lossy(&bytes);
        for (i, line) in text.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if matches.len() >= max_results {
                return (matches, files_searched, true);
            }
            matches.push(SearchMatch {
                path: relative.clone(),
                line: i + 1,
                text: line.to_string(),
            });
        }
    }

    (matches, files_searched, false)
}

/// `*` stays within one path segment; `**` crosses them
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile a glob over workspace-relative paths. Patterns without a `/`
/// match a file name at any depth.
fn compile_glob(glob: &str) -> Result<Pattern> {
    let full = if glob.contains('/') {
        glob.to_string()
    } else {
        format!("**/{}", glob)
    };
    Pattern::new(&full).with_context(|| format!("Invalid glob: {}", glob))
}
