use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use segmentation_config::ConfigLoader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "segmentation",
    version,
    about = "User segmentation service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.yml / config.toml
    #[arg(long, default_value = "config", global = true, env = "SEGMENTATION_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create the database schema and exit
    Migrate,

    /// Check whether the server is up
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is normal outside local development.
    let dotenv = dotenvy::dotenv();

    let config = ConfigLoader::with_dir(&cli.config_dir).load();
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    if let Err(e) = dotenv
        && !e.not_found()
    {
        warn!("failed to load .env: {e}");
    }
    let config = config?;

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.http.host = host;
            }
            if let Some(port) = port {
                config.http.port = port;
            }

            let server = segmentation_gateway::SegmentationServer::new(config);
            server.run().await?;
        }
        Commands::Migrate => {
            segmentation_db::SegmentStore::open(&config.database)?;
            info!("schema ready at {}", config.database.path.display());
        }
        Commands::Status => {
            let url = format!("http://{}/health", config.http.addr());
            let resp = reqwest::get(&url)
                .await
                .map_err(|_| anyhow::anyhow!("service is not running at {}", config.http.addr()))?;

            if !resp.status().is_success() {
                anyhow::bail!("service responded with {}", resp.status());
            }
            println!("segmentation service is up at {}", config.http.addr());
        }
    }

    Ok(())
}
