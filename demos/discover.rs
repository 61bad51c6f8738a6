//! Example: Wait for the scope to announce itself over UDP, then connect.

use std::sync::Arc;

use scope_link::config::DEFAULT_DISCOVERY_PORT;
use scope_link::{
    AnnouncementDiscovery, ConnectionSupervisor, DEFAULT_DEVICE_PORT, LinkConfig, LogSink, Target,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = LinkConfig::default();
    let discovery = AnnouncementDiscovery::bind(
        ([0, 0, 0, 0], DEFAULT_DISCOVERY_PORT).into(),
        config.discovery_timeout(),
        DEFAULT_DEVICE_PORT,
    )
    .await?;

    let link = ConnectionSupervisor::new(config, LogSink)?;
    link.start(Target::Discover(Arc::new(discovery)))?;

    let mut state = link.watch_state();
    while state.changed().await.is_ok() {
        println!("State: {:?}", *state.borrow());
    }

    Ok(())
}
