use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shopflow::config::ShopConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "shopflow")]
#[command(version, about = "Auto-shop workflow board with live updates")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to shopflow.toml (default: .shopflow/shopflow.toml)
    #[arg(long, global = true, env = "SHOPFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Board database path. Overrides the config file and SHOPFLOW_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Permissive CORS for local front-end development
        #[arg(long)]
        dev: bool,
    },
    /// Create the board database
    Init,
    /// Print the current board snapshot as JSON
    Snapshot {
        #[arg(long)]
        pretty: bool,
    },
    /// Repack positions in every column and re-derive statuses
    Repair,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Write a default shopflow.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = ShopConfig::resolve(cli.config.as_deref())?;
    if let Some(path) = &cli.db_path {
        config.store.path = path.clone();
    }
    let _log_guard = shopflow::logging::init_tracing(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(config, host.clone(), *port, *dev).await?;
        }
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Snapshot { pretty } => cmd::cmd_snapshot(&config, *pretty)?,
        Commands::Repair => cmd::cmd_repair(&config)?,
        Commands::Config { command } => {
            cmd::cmd_config(cli.config.as_deref(), &config, command.clone())?;
        }
    }

    Ok(())
}
