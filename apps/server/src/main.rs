//! Casa Server - headless hub controlling one Sonos player.
//!
//! Discovers the player, keeps its state mirrored from UPnP events and
//! exposes it over a small HTTP API.

mod config;

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use casa_sonos::{start_server, SonosHub, State};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use crate::config::ServerConfig;

/// Casa Server - HTTP control of a Sonos player.
#[derive(Parser, Debug)]
#[command(name = "casa-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CASA_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind address of the HTTP API (overrides config file).
    #[arg(short = 'b', long)]
    bind: Option<IpAddr>,

    /// Port of the HTTP API (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Network interface used to find the player (overrides config file).
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// Address advertised to the player (overrides config file).
    #[arg(short = 'a', long)]
    advertise_ip: Option<Ipv4Addr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    log::info!("Casa Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // CLI wins over file and environment
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(interface) = args.interface {
        config.sonos.network.interface = Some(interface);
    }
    if let Some(ip) = args.advertise_ip {
        config.sonos.network.advertise_ip = Some(ip);
    }
    config
        .validate()
        .map_err(|e| anyhow!(e))
        .context("Invalid configuration")?;

    log::info!(
        "Configuration: bind={}, interface={}, advertise_ip={}",
        config.bind_addr(),
        config.sonos.network.interface.as_deref().unwrap_or("auto"),
        config
            .sonos
            .network
            .advertise_ip
            .map_or_else(|| "auto".to_string(), |ip| ip.to_string()),
    );

    let (updates_tx, updates_rx) = mpsc::channel(config.sonos.update_channel_capacity);
    tokio::spawn(log_updates(updates_rx));

    let hub = SonosHub::start(config.sonos.clone(), updates_tx)
        .await
        .context("Failed to connect to a Sonos player")?;

    if let Some(device) = hub.device() {
        log::info!("Connected to {} at {}", device.friendly_name, device.host);
    }

    let result = start_server(hub.clone(), config.bind_addr(), shutdown_signal()).await;

    log::info!("Shutting down...");
    hub.shutdown();

    result.with_context(|| format!("HTTP server on {} failed", config.bind_addr()))?;
    log::info!("Shutdown complete");
    Ok(())
}

/// Logs the topics of each published diff.
async fn log_updates(mut updates: mpsc::Receiver<State>) {
    while let Some(diff) = updates.recv().await {
        log::info!("[Updates] {}", diff.topics().join(", "));
        match diff.error.as_deref() {
            Some("") => log::info!("[Updates] Player error cleared"),
            Some(error) => log::warn!("[Updates] Player error: {}", error),
            None => {}
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "casa-server",
            "--port",
            "9000",
            "-a",
            "10.0.0.5",
            "--interface",
            "eth0",
        ])
        .unwrap();
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.advertise_ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(args.interface.as_deref(), Some("eth0"));
        assert!(args.config.is_none());
    }
}
