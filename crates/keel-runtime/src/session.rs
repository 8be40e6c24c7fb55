use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::hooks::{HookContext, HookEvent, HookPipeline, HookRun};
use crate::process::ProcessRegistry;

/// Everything scoped to one agent session: the dispatcher and the stores
/// it shares with tools.
pub struct EngineSession {
    id: String,
    cwd: PathBuf,
    hooks: Arc<HookPipeline>,
    processes: Arc<ProcessRegistry>,
    checkpoints: Arc<CheckpointManager>,
    dispatcher: Dispatcher,
}

impl EngineSession {
    /// Build a session with a fresh id. Tools are registered afterwards on
    /// `dispatcher()`.
    pub fn new(config: &EngineConfig, hooks: HookPipeline, cwd: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), config, hooks, cwd)
    }

    pub fn with_id(
        id: impl Into<String>,
        config: &EngineConfig,
        hooks: HookPipeline,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        let id = id.into();
        let cwd = cwd.into();
        let hooks = Arc::new(hooks);
        let processes = Arc::new(ProcessRegistry::new(&config.processes));
        let checkpoints = Arc::new(CheckpointManager::new(id.clone()));

        let mut builder = Dispatcher::builder(id.clone(), cwd.clone(), hooks.clone())
            .config(&config.dispatch);
        if config.checkpoints.enabled {
            builder = builder.checkpoints(checkpoints.clone());
        }

        Self {
            id,
            cwd,
            hooks,
            processes,
            checkpoints,
            dispatcher: builder.build(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    pub fn processes(&self) -> &Arc<ProcessRegistry> {
        &self.processes
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Fire `session-start`
    pub async fn start(&self) -> HookRun {
        info!(session = %self.id, cwd = ?self.cwd, "Session started");
        self.hooks
            .trigger(HookEvent::SessionStart, &HookContext::new(&*self.id, &*self.cwd))
            .await
    }

    /// Fire a non-tool event (prompt-submitted, turn-stop, ...). Tool events
    /// belong to the dispatcher and are rejected here.
    pub async fn trigger_event(&self, event: HookEvent, extra: Option<Value>) -> Result<HookRun> {
        if event.is_tool_scoped() {
            anyhow::bail!("{} is fired by the dispatcher, not by callers", event);
        }
        let mut ctx = HookContext::new(&*self.id, &*self.cwd);
        if let Some(extra) = extra {
            ctx = ctx.with_extra(extra);
        }
        Ok(self.hooks.trigger(event, &ctx).await)
    }

    /// Kill every background process still running
    pub async fn shutdown(&self) {
        let outcomes = self.processes.kill_all().await;
        info!(session = %self.id, killed = outcomes.len(), "Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tool_events_rejected_by_trigger_event() {
        let session = EngineSession::new(&EngineConfig::default(), HookPipeline::new(), "/tmp");
        assert!(session
            .trigger_event(HookEvent::BeforeTool, None)
            .await
            .is_err());
        let run = session
            .trigger_event(HookEvent::TurnStop, Some(serde_json::json!({"turn": 1})))
            .await
            .unwrap();
        assert!(run.results.is_empty());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = EngineSession::new(&EngineConfig::default(), HookPipeline::new(), "/tmp");
        let b = EngineSession::new(&EngineConfig::default(), HookPipeline::new(), "/tmp");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.dispatcher().session_id(), a.id());
        assert_eq!(a.checkpoints().session_id(), a.id());
    }
}
