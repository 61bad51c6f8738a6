// MIT License - Copyright (c) 2026 Peter Wright
//
//! # scope-link
//!
//! Persistent command connection to a networked oscilloscope front-end.
//!
//! The device accepts newline-terminated text commands on a TCP socket. This
//! crate keeps that socket connected: it retries with a fixed backoff when the
//! device is unreachable or the link drops, reports lifecycle events to an
//! observer, and lets any caller (a UI callback, a CLI) submit commands
//! without blocking on network I/O.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scope_link::{ConnectionSupervisor, Endpoint, LinkConfig, event_channel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (events, mut rx) = event_channel(32);
//!     let link = ConnectionSupervisor::new(LinkConfig::default(), events)?;
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = rx.recv().await {
//!             println!("Event: {event}");
//!         }
//!     });
//!
//!     link.start(Endpoint::new("192.168.4.1", 8888)?)?;
//!
//!     // Later, from anywhere:
//!     link.submit_line("GAIN=4");
//!
//!     tokio::signal::ctrl_c().await?;
//!     link.stop();
//!     link.join().await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod supervisor;
pub mod transport;

// Re-exports for convenience
pub use command::Command;
pub use config::{LinkConfig, LinkConfigBuilder};
pub use discovery::{AnnouncementDiscovery, DiscoveryProvider, StaticDiscovery};
pub use endpoint::{DEFAULT_DEVICE_PORT, Endpoint};
pub use error::{CommandError, ConfigError, ConnectError, EndpointError, SendError, SupervisorError};
pub use event::{EventReceiver, EventSender, EventSink, LifecycleEvent, LogSink, event_channel};
pub use supervisor::{ConnectionSupervisor, SupervisorState, Target};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};
