use crate::config::{load_hook_config, Config};
use anyhow::Result;
use keel_runtime::{HookEvent, HookPipeline};
use std::path::PathBuf;

/// Print every compiled hook, grouped by event, in execution order
pub fn list(config: &Config, hook_files: &[PathBuf]) -> Result<()> {
    let hook_config = load_hook_config(config, hook_files)?;
    let pipeline = HookPipeline::from_config(&hook_config, &config.engine.hooks)?;

    if hook_config.hook_count() == 0 {
        println!("No hooks configured");
        return Ok(());
    }

    for event in HookEvent::ALL {
        let hooks = pipeline.list(event);
        if hooks.is_empty() {
            continue;
        }
        println!("{}:", event);
        for hook in hooks {
            let blocking = if hook.block_on_error { " block-on-error" } else { "" };
            println!(
                "  {:<20} matcher={} timeout={}s{}  {}",
                hook.id,
                hook.matcher,
                hook.timeout.as_secs(),
                blocking,
                hook.command
            );
        }
    }
    Ok(())
}
