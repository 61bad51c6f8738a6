//! Example: Keep a link to a scope at a fixed address and send a few settings.

use std::time::Duration;

use scope_link::{ConnectionSupervisor, Endpoint, LifecycleEvent, LinkConfig, event_channel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = LinkConfig::builder()
        .backoff_delay_ms(5000)
        .poll_interval_ms(1000)
        .build();

    let (events, mut rx) = event_channel(32);
    let link = ConnectionSupervisor::new(config, events)?;

    println!("Connecting to scope...");
    link.start(Endpoint::new("192.168.4.1", 8888)?)?;

    // Wait for the first successful connection
    while let Ok(event) = rx.recv().await {
        println!("Event: {event}");
        if event == LifecycleEvent::Connected {
            break;
        }
    }

    for command in ["GAIN=4", "OFFSET=-20", "TRIG=35", "COUPLING=DC"] {
        let accepted = link.submit_line(command);
        println!("  {command:12} accepted={accepted}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\nPress Ctrl+C to disconnect...");
    tokio::signal::ctrl_c().await?;
    link.stop();
    link.join().await;
    println!("Disconnected.");

    Ok(())
}
