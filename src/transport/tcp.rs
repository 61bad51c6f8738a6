// MIT License - Copyright (c) 2026 Peter Wright
// Plain TCP transport to the device command socket

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, lookup_host};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, trace};

use crate::command::Command;
use crate::endpoint::Endpoint;
use crate::error::{ConnectError, SendError};
use crate::transport::{Connector, Transport};

/// TCP transport: a write half owned by the caller plus a reader task that
/// watches for the peer closing the socket.
pub struct TcpTransport {
    endpoint: Endpoint,
    writer: Option<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    reader_handle: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Resolve and connect to `endpoint`, giving up after `connect_timeout`.
    pub async fn open(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, ConnectError> {
        debug!("Connecting to device at {}", endpoint);

        let stream = timeout(connect_timeout, connect_any(endpoint))
            .await
            .map_err(|_| ConnectError::TimedOut {
                endpoint: endpoint.clone(),
                timeout_ms: whole_millis(connect_timeout),
            })??;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        info!("Connected to device command socket at {}", endpoint);

        let (reader, writer) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = spawn_reader_task(reader, connected.clone(), endpoint.clone());

        Ok(Self {
            endpoint: endpoint.clone(),
            writer: Some(writer),
            connected,
            reader_handle: Some(reader_handle),
        })
    }
}

impl Transport for TcpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn send(&mut self, command: &Command) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(SendError::NotConnected);
        };

        let line = command.to_wire_bytes();
        if let Err(e) = writer.write_all(&line).await {
            error!("Failed to write command to {}: {}", self.endpoint, e);
            self.connected.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        trace!("Sent command: {}", command);
        Ok(())
    }

    async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.take() {
            debug!("Closing connection to {}", self.endpoint);
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

/// Opens [`TcpTransport`]s with a fixed connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn open(&self, endpoint: &Endpoint) -> Result<TcpTransport, ConnectError> {
        TcpTransport::open(endpoint, self.connect_timeout).await
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resolve the endpoint and try each address in turn.
async fn connect_any(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<_> = lookup_host((endpoint.host(), endpoint.port()))
        .await
        .map_err(|e| {
            debug!("Resolving {} failed: {}", endpoint, e);
            ConnectError::Unresolved {
                endpoint: endpoint.clone(),
            }
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::Unresolved {
            endpoint: endpoint.clone(),
        });
    }

    let mut last_error = io::Error::from(io::ErrorKind::AddrNotAvailable);
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("TCP connect to {} failed: {}", addr, e);
                last_error = e;
            }
        }
    }
    Err(ConnectError::from_io(endpoint, last_error))
}

/// Spawn the reader task. The device protocol defines no inbound messages, so
/// data is only logged; EOF or a read error marks the transport disconnected.
fn spawn_reader_task(
    mut reader: OwnedReadHalf,
    connected: Arc<AtomicBool>,
    endpoint: Endpoint,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Reader: connection to {} closed by peer", endpoint);
                    connected.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(n) => {
                    trace!(
                        "Reader: {} bytes from {}: {:?}",
                        n,
                        endpoint,
                        String::from_utf8_lossy(&buf[..n])
                    );
                }
                Err(e) => {
                    error!("Reader: read error from {}: {}", endpoint, e);
                    connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    })
}
