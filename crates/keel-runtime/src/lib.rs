pub mod atomic;
pub mod call;
pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod hooks;
pub mod process;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod tool;
pub mod validation;

pub use atomic::write_atomic;
pub use call::{BatchSummary, ToolCall, ToolErrorKind, ToolResult};
pub use checkpoint::{
    ChangeKind, CheckpointManager, CheckpointSnapshot, CheckpointSummary, FileChange,
    FileCheckpoint, RewindResult, RewindTarget,
};
pub use config::{CheckpointConfig, DispatchConfig, EngineConfig, HookDefaults, ProcessConfig};
pub use dispatcher::{Aggregation, BatchLimits, Dispatcher, DispatcherBuilder, ExecutionMode};
pub use hooks::{
    HookConfig, HookContext, HookDefinition, HookEvent, HookInvocationResult, HookOutcome,
    HookPipeline, HookRun, HookSpec, ToolMatcher,
};
pub use process::{
    BackgroundProcess, KillOptions, KillOutcome, KillSignal, ProcessHandle, ProcessRegistry,
    ProcessStatus, RegistryError, SpawnOptions,
};
pub use progress::DispatchEvent;
pub use session::EngineSession;
pub use tool::{Tool, ToolSchemaInfo};
pub use validation::{CallValidator, ValidationRule, Verdict};

/// Initialize structured JSON logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
