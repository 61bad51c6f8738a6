// MIT License - Copyright (c) 2026 Peter Wright
// Device address discovery

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;

/// Boxed future returned by [`DiscoveryProvider::discover`].
pub type DiscoverFuture<'a> = Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>>;

/// Strategy for locating the device.
///
/// Called once per connection attempt when no static endpoint is configured.
/// `None` means no device was found within the provider's own timeout; the
/// supervisor handles it like a failed connection.
pub trait DiscoveryProvider: Send + Sync {
    fn discover(&self) -> DiscoverFuture<'_>;
}

/// Always yields the same endpoint.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    endpoint: Endpoint,
}

impl StaticDiscovery {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl DiscoveryProvider for StaticDiscovery {
    fn discover(&self) -> DiscoverFuture<'_> {
        let endpoint = self.endpoint.clone();
        Box::pin(async move { Some(endpoint) })
    }
}

/// Listens for a UDP announcement datagram from the device.
///
/// Accepted payloads:
/// - `host:port`: used as-is
/// - `port`: the sender's address with that port
/// - anything else, including an empty datagram: the sender's address with
///   the default device port
pub struct AnnouncementDiscovery {
    socket: UdpSocket,
    wait: Duration,
    default_port: u16,
}

impl AnnouncementDiscovery {
    /// Bind the announcement socket. It stays bound for the provider's
    /// lifetime so announcements sent between attempts are not lost.
    pub async fn bind(addr: SocketAddr, wait: Duration, default_port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Listening for device announcements on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            wait,
            default_port,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn wait_for_announcement(&self) -> Option<Endpoint> {
        let mut buf = [0u8; 512];
        match timeout(self.wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, sender))) => {
                debug!("Announcement from {}: {:?}", sender, String::from_utf8_lossy(&buf[..n]));
                parse_announcement(&buf[..n], sender, self.default_port)
            }
            Ok(Err(e)) => {
                warn!("Announcement socket error: {}", e);
                None
            }
            Err(_) => {
                debug!("No device announcement within {:?}", self.wait);
                None
            }
        }
    }
}

impl DiscoveryProvider for AnnouncementDiscovery {
    fn discover(&self) -> DiscoverFuture<'_> {
        Box::pin(self.wait_for_announcement())
    }
}

/// Turn an announcement payload into an endpoint.
pub fn parse_announcement(payload: &[u8], sender: SocketAddr, default_port: u16) -> Option<Endpoint> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    let sender_host = sender.ip().to_string();

    if let Ok(endpoint) = text.parse::<Endpoint>() {
        return Some(endpoint);
    }
    if let Ok(port) = text.parse::<u16>()
        && port != 0
    {
        return Endpoint::new(sender_host, port).ok();
    }
    if !text.is_empty() {
        debug!("Unrecognised announcement payload {:?}, using sender address", text);
    }
    Endpoint::new(sender_host, default_port).ok()
}
