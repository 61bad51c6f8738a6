// MIT License - Copyright (c) 2026 Peter Wright
// Device endpoint addressing

use std::fmt;
use std::str::FromStr;

use crate::error::EndpointError;

/// Default TCP port the device listens on for commands.
pub const DEFAULT_DEVICE_PORT: u16 = 8888;

/// Host/port pair identifying the device.
///
/// The host is kept as given (name or literal address); resolution happens
/// when a transport is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, EndpointError> {
        let host = host.into();
        let host = host.trim();
        // Accept "[::1]" as well as "::1"
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if port == 0 {
            return Err(EndpointError::InvalidPort(port.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parse `host[:port]`, falling back to `default_port` when no port is given.
    pub fn parse_with_default_port(s: &str, default_port: u16) -> Result<Self, EndpointError> {
        match split_host_port(s.trim()) {
            Some((host, port)) => Self::new(host, parse_port(port)?),
            None => Self::new(s, default_port),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Parse `host:port` (IPv6 hosts must be bracketed: `[::1]:8888`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) =
            split_host_port(s).ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        Self::new(host, parse_port(port)?)
    }
}

/// Split off a trailing `:port`, leaving bare IPv6 literals (`::1`) alone.
fn split_host_port(s: &str) -> Option<(&str, &str)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = s.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

fn parse_port(s: &str) -> Result<u16, EndpointError> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(EndpointError::InvalidPort(s.to_string())),
        Ok(port) => Ok(port),
    }
}
