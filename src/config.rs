// MIT License - Copyright (c) 2026 Peter Wright
// Link configuration

use std::time::Duration;

use crate::command::Command;
use crate::endpoint::{DEFAULT_DEVICE_PORT, Endpoint};
use crate::error::ConfigError;

/// Default delay between a disconnection and the next attempt.
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 5000;
/// Default interval of the connection liveness poll.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default UDP port the device announces itself on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8889;

/// Configuration for supervising the connection to one device.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Device host. When `None`, the endpoint comes from discovery.
    pub device_host: Option<String>,
    /// Device command port (default: 8888)
    pub device_port: u16,
    /// Fixed delay before reconnecting after a disconnect (default: 5000)
    pub backoff_delay_ms: u64,
    /// How often the cached liveness flag is checked (default: 1000)
    pub poll_interval_ms: u64,
    /// Upper bound on one connection attempt including resolution (default: 5000)
    pub connect_timeout_ms: u64,
    /// Upper bound on writing one command before the link is treated as lost
    /// (default: 5000)
    pub send_timeout_ms: u64,
    /// Command sent periodically while connected to detect half-open sockets.
    /// Disabled when `None` (default).
    pub keepalive_command: Option<String>,
    /// Keepalive period in milliseconds (default: 10000)
    pub keepalive_interval_ms: u64,
    /// Commands that may be queued for the supervision task (default: 64)
    pub command_queue_capacity: usize,
    /// UDP port listened on by announcement discovery (default: 8889)
    pub discovery_port: u16,
    /// How long one discovery attempt waits for an announcement (default: 3000)
    pub discovery_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_host: None,
            device_port: DEFAULT_DEVICE_PORT,
            backoff_delay_ms: DEFAULT_BACKOFF_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            connect_timeout_ms: 5000,
            send_timeout_ms: 5000,
            keepalive_command: None,
            keepalive_interval_ms: 10000,
            command_queue_capacity: 64,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_timeout_ms: 3000,
        }
    }
}

impl LinkConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }

    /// The statically configured device endpoint, if a host is set.
    ///
    /// A host given as `host:port` overrides `device_port`.
    pub fn endpoint(&self) -> Result<Option<Endpoint>, ConfigError> {
        match &self.device_host {
            Some(host) => Ok(Some(Endpoint::parse_with_default_port(
                host,
                self.device_port,
            )?)),
            None => Ok(None),
        }
    }

    /// The keepalive command, if enabled.
    pub fn keepalive(&self) -> Result<Option<Command>, ConfigError> {
        match &self.keepalive_command {
            Some(text) => Ok(Some(Command::new(text.as_str())?)),
            None => Ok(None),
        }
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Check the settings the supervision loop depends on.
    ///
    /// A zero backoff would let a dead device spin the loop, and a zero
    /// interval panics inside `tokio::time::interval`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("backoff_delay_ms", self.backoff_delay_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("discovery_timeout_ms", self.discovery_timeout_ms),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::ZeroDuration { field: *field });
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        self.endpoint()?;
        self.keepalive()?;
        Ok(())
    }
}

/// Builder for LinkConfig.
#[derive(Debug, Clone, Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    pub fn device_host(mut self, host: impl Into<String>) -> Self {
        self.config.device_host = Some(host.into());
        self
    }

    pub fn device_port(mut self, port: u16) -> Self {
        self.config.device_port = port;
        self
    }

    pub fn backoff_delay_ms(mut self, ms: u64) -> Self {
        self.config.backoff_delay_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.config.send_timeout_ms = ms;
        self
    }

    pub fn keepalive_command(mut self, command: impl Into<String>) -> Self {
        self.config.keepalive_command = Some(command.into());
        self
    }

    pub fn keepalive_interval_ms(mut self, ms: u64) -> Self {
        self.config.keepalive_interval_ms = ms;
        self
    }

    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.command_queue_capacity = capacity;
        self
    }

    pub fn discovery_port(mut self, port: u16) -> Self {
        self.config.discovery_port = port;
        self
    }

    pub fn discovery_timeout_ms(mut self, ms: u64) -> Self {
        self.config.discovery_timeout_ms = ms;
        self
    }

    pub fn build(self) -> LinkConfig {
        self.config
    }
}
