// MIT License - Copyright (c) 2026 Peter Wright
// Lifecycle notifications emitted by the supervisor

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::endpoint::Endpoint;

/// Events emitted as the supervisor moves through its connection cycle.
///
/// Delivered in the order the state machine produces them. Purely
/// informational: receivers cannot influence the supervisor through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A connection attempt is starting
    Connecting,
    /// The transport is open and accepting commands
    Connected,
    /// The attempt failed or the connection was lost
    Disconnected,
    /// Discovery located the device at this endpoint
    DeviceFound(Endpoint),
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::DeviceFound(ep) => write!(f, "device found at {ep}"),
        }
    }
}

/// Observer of lifecycle events.
///
/// `deliver` is called from the supervision task and must return promptly:
/// a sink that cannot keep up drops or buffers internally.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: LifecycleEvent);
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<LifecycleEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<LifecycleEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

impl EventSink for EventSender {
    fn deliver(&self, event: LifecycleEvent) {
        // No subscribers is not an error; lagging subscribers see RecvError::Lagged
        let _ = self.send(event);
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<LifecycleEvent> {
    fn deliver(&self, event: LifecycleEvent) {
        let _ = self.send(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn deliver(&self, event: LifecycleEvent) {
        (**self).deliver(event);
    }
}

/// Sink that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: LifecycleEvent) {
        info!(target: "scope_link::event", "Device link {}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_sink_without_receivers() {
        let (tx, rx) = event_channel(4);
        drop(rx);
        // Must not panic or block
        tx.deliver(LifecycleEvent::Connecting);
    }

    #[tokio::test]
    async fn test_broadcast_sink_preserves_order() {
        let (tx, mut rx) = event_channel(8);
        let ep = Endpoint::new("scope.local", 8888).unwrap();
        tx.deliver(LifecycleEvent::Connecting);
        tx.deliver(LifecycleEvent::DeviceFound(ep.clone()));
        tx.deliver(LifecycleEvent::Connected);

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Connecting);
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::DeviceFound(ep));
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Connected);
    }

    #[test]
    fn test_slow_broadcast_receiver_lags_instead_of_blocking() {
        let (tx, mut rx) = event_channel(2);
        for _ in 0..5 {
            tx.deliver(LifecycleEvent::Disconnected);
        }
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(3))
        ));
    }

    #[test]
    fn test_arc_sink_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        sink.deliver(LifecycleEvent::Connected);
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Connected);
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::new("10.1.1.2", 8888).unwrap();
        assert_eq!(
            LifecycleEvent::DeviceFound(ep).to_string(),
            "device found at 10.1.1.2:8888"
        );
        assert_eq!(LifecycleEvent::Disconnected.to_string(), "disconnected");
    }
}
