//! camhub - camera event hub and edge identity sender.

mod app;
mod processors;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hub_config_and_utils::{init_logging, Config, Paths};

/// camhub command-line interface.
#[derive(Parser)]
#[command(name = "camhub")]
#[command(about = "Routes camera device events and delivers edge identities to the hub")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Config file path. Defaults to ~/.camhub/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub: one listener per configured channel
    Serve,
    /// Run the edge sender, reading one identity per stdin line
    Edge {
        /// Hub address (host:port)
        #[arg(long)]
        server: Option<String>,
        /// camera_id written on every event
        #[arg(long)]
        camera_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(&Paths::new()?)?,
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            config.validate()?;
            app::run_hub(config).await?;
        }
        Commands::Edge { server, camera_id } => {
            if let Some(server) = server {
                config.edge.server_addr = server;
            }
            if let Some(camera_id) = camera_id {
                config.edge.camera_id = camera_id;
            }
            config.validate()?;
            app::run_edge(config).await?;
        }
    }

    Ok(())
}
