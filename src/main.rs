//! Parley Server
//!
//! Run with: cargo run -- serve
//!
//! # Configuration
//!
//! Settings come from a TOML file (`--config`, or the first of
//! `~/.config/parley/config.toml`, `/etc/parley/config.toml`,
//! `./config.toml`), then environment variables, then command-line flags.
//!
//! Environment variables:
//! - `PARLEY_HOST`: Host to bind to (default: 0.0.0.0)
//! - `PARLEY_PORT`: Port to listen on (default: 8080)
//! - `PARLEY_STATIC_DIR`: Directory holding home.html (default: ./static)
//! - `PARLEY_OUTBOUND_FORMAT`: json or htmx (default: json; the bundled
//!   chat page needs htmx)
//! - `PARLEY_SLOW_CONSUMER`: drop or evict (default: drop)
//! - `PARLEY_LOG_LEVEL`, `PARLEY_LOG_FORMAT`: logging (default: info, pretty)
//! - `RUST_LOG`: full filter directive, takes precedence over the log level

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley::api::{serve, AppState};
use parley::config::{generate_default_config, Config, LoggingConfig};
use parley::websocket::Hub;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time WebSocket chat relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server (default)
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        config: None,
        host: None,
        port: None,
    }) {
        Commands::Serve { config, host, port } => run_server(config, host, port).await,
        Commands::Config { output } => {
            let config = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, config)
                        .with_context(|| format!("writing config to {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", config),
            }
            Ok(())
        }
    }
}

async fn run_server(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = match config_path.or_else(Config::locate) {
        Some(path) => Config::load_with_env(&path)?,
        None => Config::from_env()?,
    };

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    init_tracing(&config.logging);

    tracing::info!("Starting Parley relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        outbound_format = %config.relay.outbound_format,
        slow_consumer = %config.relay.slow_consumer,
        "Relay configured"
    );
    tracing::info!("Static directory: {:?}", config.server.static_dir);
    if config.chat_page_needs_htmx() {
        tracing::warn!(
            "home.html is served but outbound_format is {}; the chat page only shows messages with outbound_format = \"htmx\"",
            config.relay.outbound_format
        );
    }

    let (hub, dispatch) = Hub::spawn(config.relay.hub_config());
    let state = AppState::new(hub, config.relay.session_config(), config.server.clone());

    serve(state, &config.server).await?;

    // In-flight sessions still hold hub handles; the dispatch loop ends with them.
    dispatch.abort();
    tracing::info!("Parley relay stopped");

    Ok(())
}

/// Install the global tracing subscriber
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("parley={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
