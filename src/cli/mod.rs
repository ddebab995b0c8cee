//! CLI module for Callgate
//!
//! Provides operator commands:
//! - `simulate`: Run the coordinator against a scripted bridge
//! - `config`: Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod simulate;

/// Callgate resilient invocation coordinator
#[derive(Parser, Debug)]
#[command(name = "callgate")]
#[command(about = "Resilient remote-invocation coordinator")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file applied on top of the defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run concurrent requests against a scripted bridge and report the outcome
    Simulate(simulate::SimulateArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Simulate(args)) => {
            let config = crate::loader::load_config(cli.config.as_deref())?;
            simulate::run(config, args).await
        }
        Some(Commands::Config) => config::run(cli.config.as_deref()),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
