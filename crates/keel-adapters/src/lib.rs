pub mod edit_file_tool;
pub mod process_tools;
pub mod read_file_tool;
pub mod search_tool;
pub mod shell_tool;
pub mod workspace_guard;
pub mod write_file_tool;

pub use edit_file_tool::EditFileTool;
pub use process_tools::{KillProcessTool, ProcessStatusTool};
pub use read_file_tool::ReadFileTool;
pub use search_tool::SearchTool;
pub use shell_tool::ShellTool;
pub use workspace_guard::WorkspaceGuard;
pub use write_file_tool::WriteFileTool;

use anyhow::Result;
use keel_runtime::{Dispatcher, ProcessRegistry};
use std::path::PathBuf;
use std::sync::Arc;

/// Register the shell tool plus the process tools that share its registry.
pub fn register_shell_tools(
    dispatcher: &Dispatcher,
    workdir: PathBuf,
    registry: Arc<ProcessRegistry>,
    blocklist: Vec<String>,
    allowlist: Vec<String>,
) -> Result<()> {
    let shell = ShellTool::new(workdir)
        .with_registry(registry.clone())
        .with_validation(blocklist, allowlist);
    dispatcher.register_tool("shell".into(), Arc::new(shell))?;
    dispatcher.register_tool(
        "kill_process".into(),
        Arc::new(KillProcessTool::new(registry.clone())),
    )?;
    dispatcher.register_tool(
        "process_status".into(),
        Arc::new(ProcessStatusTool::new(registry)),
    )?;
    Ok(())
}

/// Register all filesystem tools (read, write, edit, search) on the dispatcher.
pub fn register_filesystem_tools(
    dispatcher: &Dispatcher,
    workspace: PathBuf,
    max_file_size_mb: u64,
) -> Result<Arc<WorkspaceGuard>> {
    let guard = Arc::new(WorkspaceGuard::new(workspace, max_file_size_mb)?);
    dispatcher.register_tool("read_file".into(), Arc::new(ReadFileTool::new(guard.clone())))?;
    dispatcher.register_tool("write_file".into(), Arc::new(WriteFileTool::new(guard.clone())))?;
    dispatcher.register_tool("edit_file".into(), Arc::new(EditFileTool::new(guard.clone())))?;
    dispatcher.register_tool("search".into(), Arc::new(SearchTool::new(guard.clone())))?;
    Ok(guard)
}
