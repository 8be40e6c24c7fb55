pub mod registry;
pub mod signal;
pub mod types;

pub use registry::ProcessRegistry;
pub use types::{
    BackgroundProcess, KillOptions, KillOutcome, KillSignal, ProcessHandle, ProcessStatus,
    RegistryError, SpawnOptions,
};
