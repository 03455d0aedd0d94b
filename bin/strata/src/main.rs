//! Strata inspection tool.

mod cli;
mod commands;

use clap::Parser;
use eyre::{Result, WrapErr};
use strata_controller::{ControllerConfig, LogSettings, init_logging};

use crate::cli::{Cli, Commands, ConfigCommand};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config init` creates the file the other commands read
    let config = if matches!(cli.command, Commands::Config(ConfigCommand::Init)) || !cli.config.exists() {
        None
    } else {
        Some(
            ControllerConfig::load(&cli.config)
                .wrap_err_with(|| format!("failed to load {}", cli.config.display()))?,
        )
    };

    let logging = config
        .as_ref()
        .map(|c| LogSettings::from_config(&c.logging))
        .unwrap_or_else(|| LogSettings::from_config(&Default::default()));
    init_logging(&cli.logs.apply(logging))?;

    let defaults = ControllerConfig::default();
    let effective = config.as_ref().unwrap_or(&defaults);
    let output = match cli.command {
        Commands::Version(command) => commands::version(effective, command)?,
        Commands::Topology(command) => commands::topology(effective, command).await?,
        Commands::Config(command) => commands::config(&cli.config, config.as_ref(), command)?,
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
