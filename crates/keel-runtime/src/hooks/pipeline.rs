use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::config::{HookConfig, HookDefinition};
use super::events::{HookContext, HookEvent, HookInvocationResult, HookOutcome};
use super::runner::{run_hook, DEFAULT_OUTPUT_CAP};
use crate::config::HookDefaults;

/// Hook definitions organized by event, in registration order
pub struct HookPipeline {
    hooks: DashMap<HookEvent, Vec<Arc<HookDefinition>>>,
    output_cap: usize,
}

/// Everything that happened for one trigger
#[derive(Debug, Clone, Serialize)]
pub struct HookRun {
    pub event: HookEvent,
    pub results: Vec<HookInvocationResult>,
}

impl HookRun {
    /// A block only counts in phases that can veto
    pub fn is_blocked(&self) -> bool {
        self.event.can_block() && self.blocking().next().is_some()
    }

    /// Message of the first blocking hook
    pub fn block_message(&self) -> Option<String> {
        if !self.event.can_block() {
            return None;
        }
        self.blocking().next().map(|r| r.message())
    }

    /// Warnings to surface: warn outcomes, plus blocks in phases that can't veto
    pub fn warnings(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| {
                r.outcome == HookOutcome::Warn
                    || (r.outcome == HookOutcome::Block && !self.event.can_block())
            })
            .map(|r| format!("{}: {}", r.hook_id, r.message()))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    fn blocking(&self) -> impl Iterator<Item = &HookInvocationResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == HookOutcome::Block)
    }
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::with_output_cap(DEFAULT_OUTPUT_CAP)
    }

    pub fn with_output_cap(output_cap: usize) -> Self {
        Self {
            hooks: DashMap::new(),
            output_cap,
        }
    }

    /// Build from an already-merged configuration
    pub fn from_config(config: &HookConfig, defaults: &HookDefaults) -> Result<Self> {
        let pipeline = Self::with_output_cap(defaults.output_cap_bytes);
        for def in config.compile(defaults)? {
            pipeline.add(def);
        }
        info!(hooks = config.hook_count(), "Hook pipeline loaded");
        Ok(pipeline)
    }

    /// Append a hook; it runs after hooks already registered for its event
    pub fn add(&self, hook: HookDefinition) {
        self.hooks
            .entry(hook.event)
            .or_default()
            .push(Arc::new(hook));
    }

    /// Remove a hook by id. Returns whether anything was removed.
    pub fn remove(&self, event: HookEvent, id: &str) -> bool {
        let Some(mut hooks) = self.hooks.get_mut(&event) else {
            return false;
        };
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        before != hooks.len()
    }

    pub fn list(&self, event: HookEvent) -> Vec<Arc<HookDefinition>> {
        self.hooks
            .get(&event)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Check if any hooks are registered for an event
    pub fn has_hooks(&self, event: &HookEvent) -> bool {
        self.hooks.get(event).map(|h| !h.is_empty()).unwrap_or(false)
    }

    /// Run every hook matching `event` and `ctx.tool_name`.
    ///
    /// Tool-scoped events run hooks sequentially in registration order;
    /// other events run their hooks concurrently. Every matching hook runs
    /// even after one blocks.
    pub async fn trigger(&self, event: HookEvent, ctx: &HookContext) -> HookRun {
        let matching: Vec<Arc<HookDefinition>> = self
            .list(event)
            .into_iter()
            .filter(|h| h.applies_to(ctx.tool_name.as_deref()))
            .collect();

        let results = if event.is_tool_scoped() {
            let mut results = Vec::with_capacity(matching.len());
            for hook in &matching {
                results.push(run_hook(hook, event, ctx, self.output_cap).await);
            }
            results
        } else {
            join_all(
                matching
                    .iter()
                    .map(|hook| run_hook(hook, event, ctx, self.output_cap)),
            )
            .await
        };

        let run = HookRun { event, results };
        if run.is_blocked() {
            warn!(
                event = %event,
                tool = ctx.tool_name.as_deref().unwrap_or(""),
                "Hook blocked operation"
            );
        } else if run.failed() > 0 {
            warn!(
                event = %event,
                failed = run.failed(),
                total = run.results.len(),
                "Hooks reported failures"
            );
        }
        run
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::HookSpec;
    use serde_json::json;
    use std::time::Duration;

    fn def(event: HookEvent, id: &str, matcher: Option<&str>, command: &str) -> HookDefinition {
        HookDefinition::new(
            event,
            HookSpec {
                id: Some(id.into()),
                matcher: matcher.map(String::from),
                command: command.into(),
                timeout_secs: None,
                block_on_error: false,
            },
            Duration::from_secs(10),
        )
        .unwrap()
    }

    fn tool_ctx(tool: &str) -> HookContext {
        HookContext::new("s", std::env::temp_dir()).for_tool("c1", tool, &json!({}))
    }

    #[tokio::test]
    async fn test_hook_registration_and_trigger() {
        let pipeline = HookPipeline::new();
        pipeline.add(def(HookEvent::BeforeTool, "ok", None, "true"));

        assert!(pipeline.has_hooks(&HookEvent::BeforeTool));
        assert!(!pipeline.has_hooks(&HookEvent::SessionStart));

        let run = pipeline
            .trigger(HookEvent::BeforeTool, &tool_ctx("shell"))
            .await;
        assert_eq!(run.results.len(), 1);
        assert!(!run.is_blocked());
    }

    #[tokio::test]
    async fn test_matcher_filters_hooks() {
        let pipeline = HookPipeline::new();
        pipeline.add(def(HookEvent::BeforeTool, "edits", Some("Write|Edit"), "true"));

        let write = pipeline.trigger(HookEvent::BeforeTool, &tool_ctx("Write")).await;
        assert_eq!(write.results.len(), 1);

        let read = pipeline.trigger(HookEvent::BeforeTool, &tool_ctx("Read")).await;
        assert!(read.results.is_empty());
    }

    #[tokio::test]
    async fn test_any_block_wins_and_all_hooks_run() {
        let pipeline = HookPipeline::new();
        pipeline.add(def(HookEvent::BeforeTool, "allow", None, "true"));
        pipeline.add(def(
            HookEvent::BeforeTool,
            "deny",
            None,
            "sh -c 'echo protected path >&2; exit 2'",
        ));
        pipeline.add(def(HookEvent::BeforeTool, "warn", None, "sh -c 'exit 1'"));

        let run = pipeline
            .trigger(HookEvent::BeforeTool, &tool_ctx("write_file"))
            .await;
        assert_eq!(run.results.len(), 3);
        assert!(run.is_blocked());
        assert_eq!(run.block_message().as_deref(), Some("protected path"));
        assert_eq!(run.warnings().len(), 1);
        assert_eq!(run.succeeded(), 1);
        assert_eq!(run.failed(), 2);
    }

    #[tokio::test]
    async fn test_after_phase_block_is_only_a_warning() {
        let pipeline = HookPipeline::new();
        pipeline.add(def(HookEvent::AfterTool, "late", None, "sh -c 'exit 2'"));

        let run = pipeline
            .trigger(HookEvent::AfterTool, &tool_ctx("write_file"))
            .await;
        assert!(!run.is_blocked());
        assert!(run.block_message().is_none());
        assert_eq!(run.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let pipeline = HookPipeline::new();
        pipeline.add(def(HookEvent::TurnStop, "a", None, "true"));
        pipeline.add(def(HookEvent::TurnStop, "b", None, "true"));

        assert!(pipeline.remove(HookEvent::TurnStop, "a"));
        assert!(!pipeline.remove(HookEvent::TurnStop, "a"));
        assert!(!pipeline.remove(HookEvent::SessionStart, "b"));
        let ids: Vec<String> = pipeline
            .list(HookEvent::TurnStop)
            .iter()
            .map(|h| h.id.clone())
            .collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_registration_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");
        let pipeline = HookPipeline::new();
        for n in 1..=3 {
            pipeline.add(def(
                HookEvent::BeforeTool,
                &format!("h{}", n),
                None,
                &format!("sh -c 'echo {} >> \"$0\"' {}", n, log.display()),
            ));
        }

        pipeline
            .trigger(HookEvent::BeforeTool, &tool_ctx("shell"))
            .await;
        let written = std::fs::read_to_string(&log).unwrap();
        assert_eq!(written, "1\n2\n3\n");
    }
}
