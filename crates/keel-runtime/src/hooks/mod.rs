pub mod config;
pub mod events;
pub mod matcher;
pub mod pipeline;
pub mod runner;

pub use config::{HookConfig, HookDefinition, HookSpec};
pub use events::{HookContext, HookEvent, HookInvocationResult, HookOutcome};
pub use matcher::ToolMatcher;
pub use pipeline::{HookPipeline, HookRun};
