//! Batch dispatch of tool calls: admission, validation, hooks, checkpoints,
//! timeouts and aggregation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::{ToolCall, ToolErrorKind, ToolResult};
use crate::checkpoint::CheckpointManager;
use crate::config::DispatchConfig;
use crate::hooks::{HookContext, HookEvent, HookPipeline};
use crate::progress::{DispatchEvent, ProgressHub};
use crate::tool::Tool;
use crate::validation::{CallValidator, ValidationContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All calls are independent; run concurrently up to the limit
    #[default]
    Parallel,
    /// One at a time, in submission order
    Sequential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Wait for every call, mixed success/failure
    #[default]
    CollectAll,
    /// After the first failure, cancel calls that have not started
    FailFast,
}

/// Per-batch limits chosen by the caller
#[derive(Debug, Clone)]
pub struct BatchLimits {
    pub mode: ExecutionMode,
    pub max_concurrent: usize,
    /// Overrides every per-tool timeout for this batch
    pub timeout: Option<Duration>,
    pub aggregation: Aggregation,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrent: 10,
            timeout: None,
            aggregation: Aggregation::CollectAll,
        }
    }
}

impl BatchLimits {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            aggregation: if config.fail_fast {
                Aggregation::FailFast
            } else {
                Aggregation::CollectAll
            },
            ..Self::default()
        }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.aggregation = Aggregation::FailFast;
        self
    }

    fn permits(&self) -> usize {
        match self.mode {
            ExecutionMode::Parallel => self.max_concurrent.max(1),
            ExecutionMode::Sequential => 1,
        }
    }
}

struct Inner {
    tools: DashMap<String, Arc<dyn Tool>>,
    tool_timeouts: DashMap<String, Duration>,
    default_timeout: Duration,
    hooks: Arc<HookPipeline>,
    checkpoints: Option<Arc<CheckpointManager>>,
    validator: CallValidator,
    progress: ProgressHub,
    session_id: String,
    cwd: PathBuf,
}

/// Executes batches of tool calls for one session.
///
/// Cloning is cheap; clones share tools, hooks and stores.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Builder for `Dispatcher`
pub struct DispatcherBuilder {
    session_id: String,
    cwd: PathBuf,
    hooks: Arc<HookPipeline>,
    checkpoints: Option<Arc<CheckpointManager>>,
    validator: CallValidator,
    default_timeout: Duration,
    tool_timeouts: Vec<(String, Duration)>,
}

impl DispatcherBuilder {
    pub fn checkpoints(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn validator(mut self, validator: CallValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Apply timeouts from configuration
    pub fn config(mut self, config: &DispatchConfig) -> Self {
        self.default_timeout = config.call_timeout();
        self.tool_timeouts = config
            .tool_timeouts
            .iter()
            .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
            .collect();
        self
    }

    pub fn build(self) -> Dispatcher {
        let tool_timeouts = DashMap::new();
        for (name, timeout) in self.tool_timeouts {
            tool_timeouts.insert(name, timeout);
        }
        Dispatcher {
            inner: Arc::new(Inner {
                tools: DashMap::new(),
                tool_timeouts,
                default_timeout: self.default_timeout,
                hooks: self.hooks,
                checkpoints: self.checkpoints,
                validator: self.validator,
                progress: ProgressHub::default(),
                session_id: self.session_id,
                cwd: self.cwd,
            }),
        }
    }
}

impl Dispatcher {
    pub fn builder(
        session_id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        hooks: Arc<HookPipeline>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            session_id: session_id.into(),
            cwd: cwd.into(),
            hooks,
            checkpoints: None,
            validator: CallValidator::default(),
            default_timeout: Duration::from_secs(30),
            tool_timeouts: Vec::new(),
        }
    }

    /// Register a tool under `name`. Names are unique.
    pub fn register_tool(&self, name: String, tool: Arc<dyn Tool>) -> Result<()> {
        if self.inner.tools.contains_key(&name) {
            anyhow::bail!("Tool '{}' already registered", name);
        }
        debug!(tool = %name, "Registered tool");
        self.inner.tools.insert(name, tool);
        Ok(())
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.tools.get(name).map(|t| t.value().clone())
    }

    /// Configure timeout for a specific tool
    pub fn configure_timeout(&self, tool_name: String, timeout: Duration) {
        self.inner.tool_timeouts.insert(tool_name, timeout);
    }

    /// Timeout for a tool (custom or default)
    pub fn get_timeout(&self, tool_name: &str) -> Duration {
        self.inner
            .tool_timeouts
            .get(tool_name)
            .map(|t| *t)
            .unwrap_or(self.inner.default_timeout)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.inner.progress.subscribe()
    }

    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.inner.hooks
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Execute a batch. Returns exactly one result per call, in input order.
    ///
    /// Admission is FIFO in submission order. Under `FailFast`, calls still
    /// waiting for a slot when a failure is observed resolve to `Cancelled`.
    pub async fn execute_batch(&self, calls: Vec<ToolCall>, limits: &BatchLimits) -> Vec<ToolResult> {
        let total = calls.len();
        info!(
            calls = total,
            mode = ?limits.mode,
            max_concurrent = limits.permits(),
            aggregation = ?limits.aggregation,
            "Executing batch"
        );

        let semaphore = Arc::new(Semaphore::new(limits.permits()));
        let cancel = CancellationToken::new();
        let fail_fast = limits.aggregation == Aggregation::FailFast;

        let mut results: Vec<Option<ToolResult>> = Vec::with_capacity(total);
        let mut running = Vec::with_capacity(total);

        for (index, call) in calls.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!(call_id = %call.id, "Call cancelled before start");
                results.push(Some(ToolResult::failed(
                    &call,
                    ToolErrorKind::Cancelled,
                    "cancelled: an earlier call in the batch failed",
                    Duration::ZERO,
                )));
                continue;
            };

            results.push(None);
            let dispatcher = self.clone();
            let cancel = cancel.clone();
            let timeout = limits.timeout;
            let identity = ToolCall::new(call.id.clone(), call.tool.clone(), Value::Null);
            let handle = tokio::spawn(async move {
                let result = dispatcher.execute_call(&call, timeout).await;
                // cancel before freeing the slot so the next waiter sees it
                if fail_fast && !result.success {
                    cancel.cancel();
                }
                drop(permit);
                result
            });
            running.push((index, identity, handle));
        }

        for (index, identity, handle) in running {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(call_id = %identity.id, error = %e, "Tool task panicked");
                    ToolResult::failed(
                        &identity,
                        ToolErrorKind::Execution,
                        format!("tool task failed: {}", e),
                        Duration::ZERO,
                    )
                }
            };
            results[index] = Some(result);
        }

        results.into_iter().flatten().collect()
    }

    /// Run stages one after another, each stage as a parallel batch.
    /// Results come back flattened in submission order.
    ///
    /// Under `FailFast`, a failing stage cancels every later stage.
    pub async fn execute_stages(
        &self,
        stages: Vec<Vec<ToolCall>>,
        limits: &BatchLimits,
    ) -> Vec<ToolResult> {
        let mut all = Vec::new();
        let mut failed = false;

        for (level, stage) in stages.into_iter().enumerate() {
            if failed && limits.aggregation == Aggregation::FailFast {
                all.extend(stage.iter().map(|call| {
                    ToolResult::failed(
                        call,
                        ToolErrorKind::Cancelled,
                        "cancelled: an earlier stage failed",
                        Duration::ZERO,
                    )
                }));
                continue;
            }

            debug!(level, calls = stage.len(), "Executing stage");
            let results = self.execute_batch(stage, limits).await;
            failed |= results.iter().any(|r| !r.success);
            all.extend(results);
        }

        all
    }

    /// Full lifecycle of a single call. Never returns an error; failures are
    /// encoded in the result.
    async fn execute_call(&self, call: &ToolCall, timeout_override: Option<Duration>) -> ToolResult {
        let inner = &self.inner;
        let start = Instant::now();

        inner.progress.emit(DispatchEvent::CallStarted {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
        });

        let result = self.run_lifecycle(call, timeout_override, start).await;

        inner.progress.emit(DispatchEvent::CallFinished {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            success: result.success,
            error_kind: result.error_kind,
            duration_ms: result.duration_ms,
        });
        info!(
            call_id = %call.id,
            tool = %call.tool,
            success = result.success,
            error_kind = ?result.error_kind,
            duration_ms = result.duration_ms,
            "Tool call finished"
        );
        result
    }

    async fn run_lifecycle(
        &self,
        call: &ToolCall,
        timeout_override: Option<Duration>,
        start: Instant,
    ) -> ToolResult {
        let inner = &self.inner;
        let tool = self.get_tool(&call.tool);
        let schema = tool.as_ref().map(|t| t.schema());

        if let Err(reason) = inner.validator.validate(&ValidationContext {
            call,
            schema: schema.as_ref(),
        }) {
            return ToolResult::failed(call, ToolErrorKind::Validation, reason, start.elapsed());
        }
        let Some(tool) = tool else {
            return ToolResult::failed(
                call,
                ToolErrorKind::Validation,
                format!("unknown tool: {}", call.tool),
                start.elapsed(),
            );
        };

        let ctx = HookContext::new(inner.session_id.clone(), inner.cwd.clone())
            .for_tool(&call.id, &call.tool, &call.input);

        let before = inner.hooks.trigger(HookEvent::BeforeTool, &ctx).await;
        let mut warnings = before.warnings();
        if let Some(message) = before.block_message() {
            let hook_id = before
                .results
                .iter()
                .find(|r| r.outcome == crate::hooks::HookOutcome::Block)
                .map(|r| r.hook_id.clone())
                .unwrap_or_default();
            warn!(call_id = %call.id, tool = %call.tool, hook = %hook_id, "Tool call blocked by hook");
            inner.progress.emit(DispatchEvent::CallBlocked {
                call_id: call.id.clone(),
                tool: call.tool.clone(),
                hook_id: hook_id.clone(),
                message: message.clone(),
            });
            let mut result =
                ToolResult::failed(call, ToolErrorKind::Blocked, message, start.elapsed())
                    .with_metadata("blocked_by", json!(hook_id));
            if !warnings.is_empty() {
                result = result.with_metadata("hook_warnings", json!(warnings));
            }
            return result;
        }

        let targets = tool.mutation_targets(&call.input);
        let pending = match &inner.checkpoints {
            Some(manager) if !targets.is_empty() => Some(manager.capture(targets).await),
            _ => None,
        };

        let timeout = timeout_override.unwrap_or_else(|| self.get_timeout(&call.tool));
        let outcome = tokio::time::timeout(timeout, tool.execute(call.input.clone())).await;

        let checkpoint_ids: Vec<String> = match (&inner.checkpoints, pending) {
            (Some(manager), Some(pending)) => manager
                .commit(pending, &call.tool, Some(&call.id))
                .await
                .into_iter()
                .map(|cp| cp.id)
                .collect(),
            _ => Vec::new(),
        };

        let mut result = match outcome {
            Ok(Ok(output)) => ToolResult::ok(call, output, start.elapsed()),
            Ok(Err(e)) => ToolResult::failed(
                call,
                ToolErrorKind::Execution,
                format!("{:#}", e),
                start.elapsed(),
            ),
            Err(_) => {
                warn!(call_id = %call.id, tool = %call.tool, timeout_ms = timeout.as_millis() as u64, "Tool call timed out");
                ToolResult::failed(
                    call,
                    ToolErrorKind::Timeout,
                    format!("timed out after {}ms", timeout.as_millis()),
                    start.elapsed(),
                )
                .with_metadata("timeout_ms", json!(timeout.as_millis() as u64))
            }
        };

        let (after_event, payload) = if result.success {
            (
                HookEvent::AfterTool,
                result.output.clone().unwrap_or(Value::Null),
            )
        } else {
            (
                HookEvent::AfterToolFailure,
                json!({ "error": result.error, "error_kind": result.error_kind }),
            )
        };
        if inner.hooks.has_hooks(&after_event) {
            let after = inner
                .hooks
                .trigger(after_event, &ctx.with_result(payload))
                .await;
            warnings.extend(after.warnings());
        }

        if !checkpoint_ids.is_empty() {
            result = result.with_metadata("checkpoints", json!(checkpoint_ids));
        }
        if !warnings.is_empty() {
            result = result.with_metadata("hook_warnings", json!(warnings));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        async fn execute(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
        fn name(&self) -> &str {
            "echo"
        }
        fn schema(&self) -> crate::tool::ToolSchemaInfo {
            crate::tool::ToolSchemaInfo {
                name: "echo".into(),
                description: String::new(),
                parameters: json!({}),
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        let d = Dispatcher::builder("s", "/tmp", Arc::new(HookPipeline::new())).build();
        d.register_tool("echo".into(), Arc::new(Echo)).unwrap();
        d
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let d = dispatcher();
        assert!(d.register_tool("echo".into(), Arc::new(Echo)).is_err());
    }

    #[test]
    fn test_timeout_override() {
        let d = dispatcher();
        assert_eq!(d.get_timeout("echo"), Duration::from_secs(30));
        d.configure_timeout("echo".into(), Duration::from_millis(5));
        assert_eq!(d.get_timeout("echo"), Duration::from_millis(5));
    }

    #[test]
    fn test_limits_from_config() {
        let config = DispatchConfig {
            fail_fast: true,
            max_concurrent: 3,
            ..DispatchConfig::default()
        };
        let limits = BatchLimits::from_config(&config);
        assert_eq!(limits.aggregation, Aggregation::FailFast);
        assert_eq!(limits.permits(), 3);
        assert_eq!(limits.sequential().permits(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_validation_failure() {
        let d = dispatcher();
        let results = d
            .execute_batch(
                vec![
                    ToolCall::new("1", "nope", json!({})),
                    ToolCall::new("2", "echo", json!({"x": 1})),
                ],
                &BatchLimits::default(),
            )
            .await;
        assert!(results[0].is_kind(ToolErrorKind::Validation));
        assert!(results[1].success);
        assert_eq!(results[1].output, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_progress_events_emitted() {
        let d = dispatcher();
        let mut rx = d.subscribe();
        d.execute_batch(
            vec![ToolCall::new("1", "echo", json!({}))],
            &BatchLimits::default(),
        )
        .await;

        assert!(matches!(rx.recv().await.unwrap(), DispatchEvent::CallStarted { .. }));
        match rx.recv().await.unwrap() {
            DispatchEvent::CallFinished { call_id, success, .. } => {
                assert_eq!(call_id, "1");
                assert!(success);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
