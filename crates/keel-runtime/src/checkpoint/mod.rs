pub mod manager;
pub mod types;

pub use manager::{CheckpointManager, PendingCapture};
pub use types::{
    ChangeKind, CheckpointSnapshot, CheckpointSummary, FileChange, FileCheckpoint, FileSummary,
    RevertedChange, RewindFailure, RewindResult, RewindTarget,
};
