mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, HookCommands};

#[tokio::main]
async fn main() -> Result<()> {
    keel_runtime::init_logging();

    let cli = Cli::parse();

    // init doesn't need a config
    if let Commands::Init { path } = &cli.command {
        return commands::init::run_init(path);
    }

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => unreachable!(),
        Commands::RunBatch {
            file,
            workspace,
            fail_fast,
            sequential,
            max_concurrent,
            json,
            checkpoint_dir,
        } => {
            let options = commands::run_batch::BatchOptions {
                workspace,
                fail_fast,
                sequential,
                max_concurrent,
                json,
                checkpoint_dir,
            };
            let ok = commands::run_batch::execute(file, options, &config, &cli.hook_files).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Checkpoints { dir, action } => commands::checkpoints::execute(&dir, action).await?,
        Commands::Hooks { action } => match action {
            HookCommands::List => commands::hooks::list(&config, &cli.hook_files)?,
        },
    }

    Ok(())
}
