use anyhow::Result;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# Keel configuration

[engine.dispatch]
max_concurrent = 10
call_timeout_secs = 30
fail_fast = false

[engine.dispatch.tool_timeouts]
shell = 120

[engine.hooks]
default_timeout_secs = 60

[engine.processes]
kill_timeout_ms = 5000
force_grace_ms = 2000

[engine.checkpoints]
enabled = true

[tools.shell]
enabled = true
blocklist = ["mkfs", "dd if="]
allowlist = []

[tools.filesystem]
enabled = true
max_file_size_mb = 10

# Hooks receive the event payload as JSON on stdin.
# Exit 0 = allow, 2 = block (before-tool only), anything else = warning.
#
# [[hooks.events.before-tool]]
# matcher = "write_file|edit_file"
# command = "./scripts/check-path.sh {tool_name}"
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Created config at {:?}", path);
    Ok(())
}
