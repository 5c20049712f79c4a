// netprobe - Main Entry Point
//
// - serve: run the WebSocket probe server until Ctrl-C
// - check-config: print the effective configuration
// - validate: dry-run parameter validation for one probe

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netprobe::config::Config;
use netprobe::logging;
use netprobe::probe::{ProbeKind, ProbeRequest};
use netprobe::server;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// netprobe: streaming network diagnostics over WebSocket
#[derive(Parser, Debug)]
#[command(name = "netprobe")]
#[command(version)]
#[command(about = "Run whitelisted ping and dig probes over WebSocket", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Configuration file (default: XDG config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate the configuration and print it as TOML
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate probe parameters and print the arguments that would run
    Validate {
        /// Probe kind (ping or dig)
        kind: String,

        /// Parameters as a JSON object
        parameters: String,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(&path)
        }
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve { bind, config } => {
            let mut config = load_config(config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
                config.validate()?;
            }
            logging::init_tracing(&config.logging, args.verbose)?;
            info!("netprobe v{} starting...", env!("CARGO_PKG_VERSION"));

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown requested");
                        trigger.cancel();
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            });

            server::serve(config, shutdown).await?;
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config)?;
            print!("{}", config.to_toml()?);
        }
        Commands::Validate { kind, parameters } => {
            let kind = ProbeKind::from_wire(&kind)
                .with_context(|| format!("Unknown probe kind '{}': expected ping or dig", kind))?;
            let parameters: serde_json::Value =
                serde_json::from_str(&parameters).context("Parameters must be a JSON object")?;
            let request = ProbeRequest::validate(kind, &parameters)?;
            println!("{} {}", kind.as_str(), request.arguments().join(" "));
        }
    }

    Ok(())
}
