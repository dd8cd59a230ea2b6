//! Command-line interface for the jSupla device server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jsupla_core::config::env_vars;
use jsupla_core::{EventBus, JSuplaEvent, ServerConfig};
use jsupla_devices::{DeviceRegistry, DeviceService, DiscoveryService};
use jsupla_server::Server;

/// jSupla server - accepts Supla devices and bridges them to local devices.
#[derive(Parser, Debug)]
#[command(name = "jsupla")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Falls back to JSUPLA_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the device server.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate the configuration and print it with secrets masked.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_filter = if args.verbose { "jsupla=debug" } else { "jsupla=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }

    let config_path = args
        .config
        .or_else(|| std::env::var_os(env_vars::CONFIG).map(PathBuf::from));

    match args.command {
        Command::Serve { host, port } => run_server(config_path.as_deref(), host, port).await,
        Command::CheckConfig => check_config(config_path.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    ServerConfig::load(path).with_context(|| match path {
        Some(path) => format!("Invalid configuration in {}", path.display()),
        None => "Invalid configuration".to_string(),
    })
}

/// Run the device server until Ctrl-C.
async fn run_server(path: Option<&Path>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let event_bus = EventBus::with_capacity(config.event_capacity);
    let registry = DeviceRegistry::new();
    let discovery = Arc::new(DiscoveryService::new(
        config.bridge_id.clone(),
        event_bus.clone(),
    ));

    let device_service = DeviceService::new(registry.clone(), event_bus.clone(), config.auto_provision);
    device_service.start();

    let mut device_events = event_bus.device_events();
    let event_logger = tokio::spawn(async move {
        while let Some((event, _)) = device_events.recv().await {
            match event {
                JSuplaEvent::DeviceOnline { guid, .. } => tracing::info!(%guid, "Device online"),
                JSuplaEvent::DeviceOffline { guid, reason, .. } => {
                    tracing::info!(%guid, reason = reason.as_deref().unwrap_or(""), "Device offline")
                }
                JSuplaEvent::ChannelValueChanged {
                    guid,
                    channel_number,
                    value,
                    ..
                } => tracing::debug!(%guid, channel_number, ?value, "Channel value changed"),
                _ => {}
            }
        }
    });

    let server = Server::bind(&config, registry, discovery, event_bus).await?;
    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    device_service.stop();
    event_logger.abort();
    result?;
    Ok(())
}

/// Print the effective configuration with secrets masked.
fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config.redacted())
        .context("Failed to render configuration")?;
    println!("{}", rendered);
    println!("# configuration is valid");
    Ok(())
}
