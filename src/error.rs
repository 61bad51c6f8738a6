// MIT License - Copyright (c) 2026 Peter Wright
// Error types for the device link

use std::io;

use crate::endpoint::Endpoint;

/// Failure to establish a connection to the device.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Connection refused by {endpoint}")]
    Refused { endpoint: Endpoint },

    #[error("Connection to {endpoint} timed out after {timeout_ms}ms")]
    TimedOut { endpoint: Endpoint, timeout_ms: u64 },

    #[error("Could not resolve {endpoint}")]
    Unresolved { endpoint: Endpoint },

    #[error("I/O error connecting to {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Classify an I/O error returned by a connect attempt.
    pub fn from_io(endpoint: &Endpoint, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused {
                endpoint: endpoint.clone(),
            },
            _ => Self::Io {
                endpoint: endpoint.clone(),
                source,
            },
        }
    }

    /// The endpoint the failed attempt was aimed at.
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Refused { endpoint }
            | Self::TimedOut { endpoint, .. }
            | Self::Unresolved { endpoint }
            | Self::Io { endpoint, .. } => endpoint,
        }
    }
}

/// Failure to write a command to an open connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Broken pipe")]
    BrokenPipe,

    #[error("Connection reset by peer")]
    Reset,

    #[error("Connection closed")]
    Closed,

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Write did not complete within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => Self::Closed,
            io::ErrorKind::NotConnected => Self::NotConnected,
            _ => Self::Io(e),
        }
    }
}

/// An endpoint that cannot identify a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("Empty host")]
    EmptyHost,

    #[error("Port must be in 1..=65535, got {0}")]
    InvalidPort(String),

    #[error("Missing port in {0:?} (expected host:port)")]
    MissingPort(String),
}

/// A command line that cannot be sent as a single line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Command contains a line terminator at byte {position}")]
    EmbeddedNewline { position: usize },
}

/// Invalid supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid device endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Command queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("Invalid keepalive command: {0}")]
    Keepalive(#[from] CommandError),
}

/// Errors returned by the supervisor's control API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("start() must be called from within a Tokio runtime")]
    NoRuntime,

    #[error("Supervisor has been stopped")]
    Stopped,
}
