//! `edgerelay` entrypoint: gateway, directory and agent subcommands.

mod config;
mod daemon;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use agent::{EdgeAgent, LoadAverage};
use clap::{Parser, Subcommand};
use directory::PlacementDirectory;
use gateway::RelayGateway;
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Top-level command-line arguments.
#[derive(Parser)]
#[command(name = "edgerelay")]
#[command(about = "Edge relay gateway, placement directory and edge agent", version)]
struct Cli {
    /// Path to config file (JSON, or TOML with a .toml extension)
    #[arg(short, long, short_alias = 'f', global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Also write debug logs to ~/.edgerelay/logs/
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run a relay gateway
    Gateway,
    /// Run the placement directory
    Directory,
    /// Run an edge agent
    Agent {
        /// Overrides agent.node_id from the config file
        #[arg(long)]
        node_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _file_guard = init_tracing(&cli.log_level, cli.debug);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Gateway => {
            let settings = config.gateway.to_settings()?;
            info!(bind = %settings.bind_addr, advertised = %settings.advertised.host, "Starting relay gateway");
            RelayGateway::new(settings)
                .run(daemon::wait_for_shutdown())
                .await?;
        }
        Commands::Directory => {
            let settings = config.directory.to_settings()?;
            info!(bind = %settings.bind_addr, gateways = settings.homes.len(), "Starting placement directory");
            PlacementDirectory::new(settings)?
                .run(daemon::wait_for_shutdown())
                .await?;
        }
        Commands::Agent { node_id } => {
            let mut section = config.agent.clone();
            if let Some(node_id) = node_id {
                section.node_id = node_id;
            }
            let settings = section.to_settings()?;
            info!(node_id = %settings.node_id, "Starting edge agent");
            EdgeAgent::new(settings, Arc::new(LoadAverage::new()))?
                .run(daemon::wait_for_shutdown())
                .await;
        }
    }

    Ok(())
}

/// Installs the console subscriber and, with `--debug`, a daily rotated
/// file under `~/.edgerelay/logs/debug.YYYY-MM-DD.log`. The returned guard
/// must outlive `main` so buffered file writes are flushed on exit.
fn init_tracing(
    log_level: &str,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer().with_target(false).with_filter(console_filter);

    if !debug {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = PathBuf::from(home).join(".edgerelay").join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new(
            "debug,hyper=info,hyper_util=info,reqwest=info,tungstenite=info,tokio_tungstenite=info",
        ));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Some(guard)
}
