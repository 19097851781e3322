//! Command-line entry point for the Marketchat server.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

/// Main CLI structure for the Marketchat server
#[derive(Debug, Parser)]
#[command(name = "marketchat")]
#[command(about = "Real-time buyer/seller conversation server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind; overrides the configuration file and environment.
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (yaml, yml, json or toml). Profile defaults are
        /// used when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Write the OpenAPI document
    Spec {
        /// `json` or `yaml` for stdout, or a file path. Defaults to YAML on stdout.
        output: Option<String>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config, port).context("failed to load configuration")?;
    server::server::run(resolved).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Spec { output } => server::commands::spec::generate_spec(output.as_deref())
            .map_err(|err| anyhow::anyhow!("failed to generate OpenAPI document: {err}")),
    }
}
