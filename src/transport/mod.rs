// MIT License - Copyright (c) 2026 Peter Wright
// Connection primitives used by the supervisor

pub mod tcp;

use std::future::Future;

use crate::command::Command;
use crate::endpoint::Endpoint;
use crate::error::{ConnectError, SendError};

pub use tcp::{TcpConnector, TcpTransport};

/// One open connection to the device.
///
/// A transport is used for a single connection cycle and never reopened.
/// Once a send fails the transport reports `is_connected() == false` and
/// rejects further sends.
pub trait Transport: Send + 'static {
    /// The endpoint this transport is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Write `command` followed by `\n` as one complete line.
    fn send(&mut self, command: &Command) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Cached liveness flag. Does not perform I/O.
    fn is_connected(&self) -> bool;
}

/// Factory for transports; the supervisor asks it for a fresh transport on
/// every connection attempt.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn open(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Transport, ConnectError>> + Send;
}
