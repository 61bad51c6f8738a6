// End-to-end scenarios against a device stand-in on a loopback TCP listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::{Instant, timeout};

use scope_link::{
    AnnouncementDiscovery, ConnectionSupervisor, Endpoint, LifecycleEvent, LinkConfig,
    SupervisorState, Target,
};

fn fast_config() -> LinkConfig {
    LinkConfig::builder()
        .backoff_delay_ms(200)
        .poll_interval_ms(50)
        .connect_timeout_ms(1000)
        .build()
}

async fn device() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new("127.0.0.1", port).unwrap())
}

async fn next_event(rx: &mut UnboundedReceiver<LifecycleEvent>) -> LifecycleEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("supervisor never connected")
        .unwrap();
    stream
}

#[tokio::test]
async fn test_command_arrives_exactly_once() {
    let (listener, endpoint) = device().await;
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let mut peer = accept(&listener).await;

    assert!(link.submit_line("PING"));

    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"PING\n");

    // Nothing else follows
    let more = timeout(Duration::from_millis(300), peer.read(&mut buf)).await;
    assert!(more.is_err(), "unexpected extra bytes on the wire");

    link.stop();
    link.join().await;
}

#[tokio::test]
async fn test_commands_keep_submission_order() {
    let (listener, endpoint) = device().await;
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let mut peer = accept(&listener).await;

    let sent: Vec<String> = (1..=20).map(|i| format!("GAIN={i}")).collect();
    for line in &sent {
        assert!(link.submit_line(line));
    }

    let expected: String = sent.iter().map(|l| format!("{l}\n")).collect();
    let mut received = vec![0u8; expected.len()];
    timeout(Duration::from_secs(2), peer.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(received).unwrap(), expected);
}

#[tokio::test]
async fn test_peer_close_triggers_reconnect() {
    let (listener, endpoint) = device().await;
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let peer = accept(&listener).await;
    drop(peer);

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Disconnected);
    let lost_at = Instant::now();
    assert!(!link.submit_line("PING"));

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert!(lost_at.elapsed() >= Duration::from_millis(200));
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let _peer = accept(&listener).await;
    assert_eq!(link.state(), SupervisorState::Connected);
}

#[tokio::test]
async fn test_unreachable_device_cycles_until_stopped() {
    let (listener, endpoint) = device().await;
    drop(listener);

    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(endpoint).unwrap();

    let mut attempts = Vec::new();
    for _ in 0..3 {
        assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
        attempts.push(Instant::now());
        assert_eq!(next_event(&mut rx).await, LifecycleEvent::Disconnected);
    }
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(200));
    }

    link.stop();
    link.join().await;
    assert_eq!(link.state(), SupervisorState::Stopped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_closes_the_socket() {
    let (listener, endpoint) = device().await;
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let mut peer = accept(&listener).await;

    link.stop();
    link.join().await;

    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "device should see EOF after stop");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_announced_device_is_found_and_connected() {
    let (listener, endpoint) = device().await;

    let discovery = AnnouncementDiscovery::bind(
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_secs(2),
        8888,
    )
    .await
    .unwrap();
    let announce_to = discovery.local_addr().unwrap();

    let announcer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    announcer
        .send_to(endpoint.to_string().as_bytes(), announce_to)
        .await
        .unwrap();

    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(fast_config(), tx).unwrap();
    link.start(Target::Discover(Arc::new(discovery))).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::DeviceFound(endpoint));
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let _peer = accept(&listener).await;
}

/// Queue far more than the socket buffers hold. Returns how many were accepted.
fn flood(link: &ConnectionSupervisor) -> usize {
    let bulk = "X".repeat(4 << 20);
    (0..16).filter(|_| link.submit_line(&bulk)).count()
}

#[tokio::test]
async fn test_stop_while_device_stops_reading() {
    let (listener, endpoint) = device().await;
    let config = LinkConfig::builder()
        .backoff_delay_ms(200)
        .poll_interval_ms(50)
        .send_timeout_ms(60_000)
        .build();
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(config, tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let _peer = accept(&listener).await;

    assert_eq!(flood(&link), 16);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(link.state(), SupervisorState::Connected);

    link.stop();
    timeout(Duration::from_secs(5), link.join())
        .await
        .expect("join() did not return while a write was stalled");
    assert_eq!(link.state(), SupervisorState::Stopped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stalled_write_counts_as_lost_link() {
    let (listener, endpoint) = device().await;
    let config = LinkConfig::builder()
        .backoff_delay_ms(200)
        .poll_interval_ms(50)
        .send_timeout_ms(500)
        .build();
    let (tx, mut rx) = unbounded_channel();
    let link = ConnectionSupervisor::new(config, tx).unwrap();
    link.start(endpoint).unwrap();

    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let _stuck_peer = accept(&listener).await;

    assert_eq!(flood(&link), 16);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Disconnected);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut rx).await, LifecycleEvent::Connected);
    let _peer = accept(&listener).await;

    link.stop();
    link.join().await;
}
