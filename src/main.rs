use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vigilant::config::VigilantConfig;

/// Log event pipeline server
#[derive(Debug, Parser)]
#[command(name = "vigilant", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the ingestion, materializer, and query server
    Serve {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "vigilant.toml")]
        config: PathBuf,

        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config {
        #[arg(short, long, default_value = "vigilant.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let mut config = VigilantConfig::load(&config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            vigilant::server::start(config).await?;
        }
        Commands::Config { config } => {
            let config = VigilantConfig::load(&config)?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
