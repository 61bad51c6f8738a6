// MIT License - Copyright (c) 2026 Peter Wright
// Command-line link to the device

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use scope_link::config::{DEFAULT_BACKOFF_DELAY_MS, DEFAULT_DISCOVERY_PORT, DEFAULT_POLL_INTERVAL_MS};
use scope_link::{
    AnnouncementDiscovery, ConnectionSupervisor, DEFAULT_DEVICE_PORT, LifecycleEvent, LinkConfig,
    Target, event_channel,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "scope-link")]
#[command(about = "Keep a command connection to the scope open and forward stdin lines to it")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Device host (overrides the config file; omit to use discovery)
    #[arg(long)]
    host: Option<String>,

    /// Device command port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    device: DeviceToml,
    #[serde(default)]
    link: LinkToml,
    #[serde(default)]
    discovery: DiscoveryToml,
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    #[serde(default)]
    host: Option<String>,
    #[serde(default = "default_device_port")]
    port: u16,
}

impl Default for DeviceToml {
    fn default() -> Self {
        Self {
            host: None,
            port: default_device_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkToml {
    #[serde(default = "default_backoff_delay")]
    backoff_delay_ms: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_send_timeout")]
    send_timeout_ms: u64,
    #[serde(default)]
    keepalive_command: Option<String>,
    #[serde(default = "default_keepalive_interval")]
    keepalive_interval_ms: u64,
    #[serde(default = "default_command_queue_capacity")]
    command_queue_capacity: usize,
}

impl Default for LinkToml {
    fn default() -> Self {
        Self {
            backoff_delay_ms: default_backoff_delay(),
            poll_interval_ms: default_poll_interval(),
            connect_timeout_ms: default_connect_timeout(),
            send_timeout_ms: default_send_timeout(),
            keepalive_command: None,
            keepalive_interval_ms: default_keepalive_interval(),
            command_queue_capacity: default_command_queue_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryToml {
    #[serde(default = "default_discovery_port")]
    port: u16,
    #[serde(default = "default_discovery_timeout")]
    timeout_ms: u64,
}

impl Default for DiscoveryToml {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            timeout_ms: default_discovery_timeout(),
        }
    }
}

fn default_device_port() -> u16 {
    DEFAULT_DEVICE_PORT
}
fn default_backoff_delay() -> u64 {
    DEFAULT_BACKOFF_DELAY_MS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_send_timeout() -> u64 {
    5000
}
fn default_keepalive_interval() -> u64 {
    10000
}
fn default_command_queue_capacity() -> usize {
    64
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_discovery_timeout() -> u64 {
    3000
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            toml::from_str(&text).context("Failed to parse config file")
        }
        None => Ok(Config::default()),
    }
}

fn build_link_config(config: &Config, cli: &Cli) -> LinkConfig {
    let mut builder = LinkConfig::builder()
        .device_port(cli.port.unwrap_or(config.device.port))
        .backoff_delay_ms(config.link.backoff_delay_ms)
        .poll_interval_ms(config.link.poll_interval_ms)
        .connect_timeout_ms(config.link.connect_timeout_ms)
        .send_timeout_ms(config.link.send_timeout_ms)
        .keepalive_interval_ms(config.link.keepalive_interval_ms)
        .command_queue_capacity(config.link.command_queue_capacity)
        .discovery_port(config.discovery.port)
        .discovery_timeout_ms(config.discovery.timeout_ms);
    if let Some(host) = cli.host.as_ref().or(config.device.host.as_ref()) {
        builder = builder.device_host(host);
    }
    if let Some(command) = &config.link.keepalive_command {
        builder = builder.keepalive_command(command);
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=scope_link=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let link_config = build_link_config(&config, &cli);
    link_config.validate().context("Invalid configuration")?;

    let target = match link_config.endpoint()? {
        Some(endpoint) => {
            info!("Using configured device at {endpoint}");
            Target::Static(endpoint)
        }
        None => {
            let bind: SocketAddr = ([0, 0, 0, 0], link_config.discovery_port).into();
            let discovery = AnnouncementDiscovery::bind(
                bind,
                link_config.discovery_timeout(),
                link_config.device_port,
            )
            .await
            .with_context(|| format!("Failed to bind discovery socket on {bind}"))?;
            Target::Discover(Arc::new(discovery))
        }
    };

    let (events, mut event_rx) = event_channel(64);
    let link = ConnectionSupervisor::new(link_config, events)?;

    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(LifecycleEvent::Disconnected) => warn!("Device disconnected"),
                Ok(event) => info!("Device link {event}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event receiver lagged, missed {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    link.start(target)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Reading commands from stdin. Send SIGINT/SIGTERM to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        continue;
                    }
                    if !link.submit_line(line) {
                        warn!("Device not connected, dropped command: {line}");
                    }
                }
                Ok(None) => {
                    info!("stdin closed; link stays up until SIGINT/SIGTERM");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    link.stop();
    link.join().await;
    drop(link);
    let _ = event_handle.await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(host: Option<&str>, port: Option<u16>) -> Cli {
        Cli {
            config: None,
            host: host.map(str::to_string),
            port,
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let link = build_link_config(&config, &cli(None, None));
        assert_eq!(link.device_port, 8888);
        assert_eq!(link.backoff_delay_ms, 5000);
        assert_eq!(link.poll_interval_ms, 1000);
        assert_eq!(link.send_timeout_ms, 5000);
        assert_eq!(link.discovery_port, 8889);
        assert!(link.endpoint().unwrap().is_none());
    }

    #[test]
    fn test_config_file_values() {
        let config: Config = toml::from_str(
            r#"
            [device]
            host = "192.168.4.1"
            port = 9000

            [link]
            backoff_delay_ms = 2000
            send_timeout_ms = 1500
            keepalive_command = "PING"
            "#,
        )
        .unwrap();
        let link = build_link_config(&config, &cli(None, None));
        assert_eq!(link.endpoint().unwrap().unwrap().to_string(), "192.168.4.1:9000");
        assert_eq!(link.backoff_delay_ms, 2000);
        assert_eq!(link.send_timeout_ms, 1500);
        assert_eq!(link.poll_interval_ms, 1000);
        assert_eq!(link.keepalive_command.as_deref(), Some("PING"));
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let config: Config = toml::from_str(
            r#"
            [device]
            host = "192.168.4.1"
            "#,
        )
        .unwrap();
        let link = build_link_config(&config, &cli(Some("10.0.0.9"), Some(7000)));
        assert_eq!(link.endpoint().unwrap().unwrap().to_string(), "10.0.0.9:7000");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["scope-link", "--host", "scope.local", "--port", "8888"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("scope.local"));
        assert_eq!(cli.port, Some(8888));
        assert!(cli.config.is_none());
    }
}
