use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stratum_timestamp::{TimestampClient, TimestampServer};
use stratumd::{Environment, StratumConfig};
use tracing::{error, info, Level};

/// Stratum transaction core service.
#[derive(Parser)]
#[command(name = "stratumd", author, version, about = "Stratum transaction core", long_about = None)]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timestamp server and metrics exporter.
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Fetch timestamps from a running server.
    NextTs {
        /// Server address.
        #[arg(long, default_value = "127.0.0.1:7420")]
        addr: String,
        /// How many timestamps to request.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Validate the configuration, or probe a server when `--addr` is given.
    HealthCheck {
        /// Server address to probe.
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StratumConfig::load(path)?,
        None => StratumConfig::default(),
    };

    match cli.command {
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::NextTs { addr, count } => {
            let _log = stratum_log::init_stdout(Level::WARN)?;
            let client = TimestampClient::connect(addr.as_str())
                .await
                .with_context(|| format!("connect to {addr}"))?;
            for _ in 0..count {
                println!("{}", client.next().await?);
            }
            Ok(())
        }
        Commands::HealthCheck { addr } => {
            match addr {
                Some(addr) => match stratumd::health_check(&addr).await {
                    Ok(ts) => println!("OK {ts}"),
                    Err(e) => {
                        println!("FAILED: {e:#}");
                        std::process::exit(1);
                    }
                },
                None => println!("OK"),
            }
            Ok(())
        }
    }
}

async fn serve(config: StratumConfig, listen: Option<String>) -> Result<()> {
    let level = config.log.level()?;
    let _log = match &config.log.dir {
        Some(dir) => stratum_log::init(dir, level)?,
        None => stratum_log::init_stdout(level)?,
    };

    if let Some(addr) = &config.metrics_listen {
        stratum_metrics::serve(addr, config.metrics_basic_auth()).await?;
    }

    let listen = listen.unwrap_or_else(|| config.listen.clone());
    let env = Environment::start(config).await?;
    let server = TimestampServer::new(env.oracle().clone());

    tokio::select! {
        result = server.serve(&listen) => {
            if let Err(e) = &result {
                error!(error = %e, "timestamp server failed");
            }
            env.shutdown().await;
            result.context("timestamp server")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            env.shutdown().await;
            Ok(())
        }
    }
}
