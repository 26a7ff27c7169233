//! Command line entry point for the `SportsIn` messaging server.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;

/// Main CLI structure for the `SportsIn` messaging server
#[derive(Debug, Parser)]
#[command(name = "SportsIn Messaging")]
#[command(about = "Direct messaging server for SportsIn", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the messaging server
    Serve {
        /// Port to bind; overrides the configuration file and environment.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print the resolved configuration as YAML and exit
    Config {
        /// Path to a YAML or JSON configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn run_app(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, config } => {
            let config = Config::load_config(config, port)?;
            server::server::run(config).await
        }
        Commands::Config { config } => {
            let config = Config::load_config(config, None)?;
            let yaml = serde_yml::to_string(&config).context("failed to render configuration")?;
            print!("{yaml}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    run_app(Cli::parse()).await
}
