use crate::config::{load_hook_config, Config};
use anyhow::{Context, Result};
use keel_runtime::scheduler::{has_dependencies, into_stages, parse_plan};
use keel_runtime::{BatchLimits, BatchSummary, EngineSession, HookPipeline, ToolResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub struct BatchOptions {
    pub workspace: Option<PathBuf>,
    pub fail_fast: bool,
    pub sequential: bool,
    pub max_concurrent: Option<usize>,
    pub json: bool,
    pub checkpoint_dir: Option<PathBuf>,
}

/// Run a plan file through a fresh session. Returns whether every call succeeded.
pub async fn execute(
    plan_file: PathBuf,
    options: BatchOptions,
    config: &Config,
    hook_files: &[PathBuf],
) -> Result<bool> {
    info!(?plan_file, "Running batch");

    let plan_content = std::fs::read_to_string(&plan_file)
        .context(format!("Failed to read plan file: {:?}", plan_file))?;
    let plan: serde_json::Value =
        serde_json::from_str(&plan_content).context("Failed to parse plan JSON")?;
    let planned = parse_plan(&plan)?;

    let workspace = match options.workspace.clone() {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    let hook_config = load_hook_config(config, hook_files)?;
    let hooks = HookPipeline::from_config(&hook_config, &config.engine.hooks)?;
    let session = EngineSession::new(&config.engine, hooks, workspace.clone());
    register_tools(&session, config, workspace)?;

    let start = session.start().await;
    if start.failed() > 0 {
        warn!(failed = start.failed(), "Some session-start hooks failed");
    }

    let limits = batch_limits(config, &options);
    let results = if has_dependencies(&planned) {
        let stages = into_stages(planned)?;
        info!(stages = stages.len(), "Plan has dependencies, running in stages");
        session.dispatcher().execute_stages(stages, &limits).await
    } else {
        let calls = planned.into_iter().map(|p| p.call).collect();
        session.dispatcher().execute_batch(calls, &limits).await
    };

    report(&results, options.json)?;
    let summary = BatchSummary::from_results(&results);
    println!("{}", summary);

    if let Some(dir) = &options.checkpoint_dir {
        session.checkpoints().snapshot().save(dir)?;
        info!(dir = ?dir, checkpoints = session.checkpoints().len(), "Saved checkpoints");
    }

    session.shutdown().await;
    Ok(summary.failed == 0)
}

fn register_tools(session: &EngineSession, config: &Config, workspace: PathBuf) -> Result<()> {
    let dispatcher = session.dispatcher();

    if config.tools.filesystem.enabled {
        keel_adapters::register_filesystem_tools(
            dispatcher,
            workspace.clone(),
            config.tools.filesystem.max_file_size_mb,
        )?;
        info!("Registered filesystem tools");
    }

    if config.tools.shell.enabled {
        keel_adapters::register_shell_tools(
            dispatcher,
            workspace,
            session.processes().clone(),
            config.tools.shell.blocklist.clone(),
            config.tools.shell.allowlist.clone(),
        )?;
        info!("Registered shell tools");
    }

    for (tool, secs) in &config.engine.dispatch.tool_timeouts {
        dispatcher.configure_timeout(tool.clone(), Duration::from_secs(*secs));
    }
    Ok(())
}

/// CLI flags take precedence over `[engine.dispatch]`
fn batch_limits(config: &Config, options: &BatchOptions) -> BatchLimits {
    let mut limits = BatchLimits::from_config(&config.engine.dispatch);
    if let Some(n) = options.max_concurrent {
        limits.max_concurrent = n;
    }
    if options.sequential {
        limits = limits.sequential();
    }
    if options.fail_fast {
        limits = limits.fail_fast();
    }
    limits
}

fn report(results: &[ToolResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for result in results {
        if result.success {
            println!("ok    {} ({}) {}ms", result.call_id, result.tool, result.duration_ms);
        } else {
            let kind = result
                .error_kind
                .map(|k| format!("{:?}", k).to_lowercase())
                .unwrap_or_default();
            println!(
                "FAIL  {} ({}) [{}] {}",
                result.call_id,
                result.tool,
                kind,
                result.error.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
