// MIT License - Copyright (c) 2026 Peter Wright
// Connection supervisor: keeps one device connected and forwards commands

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at, sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::config::LinkConfig;
use crate::discovery::DiscoveryProvider;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, SendError, SupervisorError};
use crate::event::{EventSink, LifecycleEvent};
use crate::transport::{Connector, TcpConnector, Transport};

/// Where the supervisor gets the device address from.
#[derive(Clone)]
pub enum Target {
    /// A fixed endpoint, used for every attempt
    Static(Endpoint),
    /// Ask the provider once per attempt
    Discover(Arc<dyn DiscoveryProvider>),
}

impl From<Endpoint> for Target {
    fn from(endpoint: Endpoint) -> Self {
        Self::Static(endpoint)
    }
}

/// Supervisor connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created, `start()` not yet called
    Idle,
    /// Resolving the device or opening a transport
    Connecting,
    /// Transport open; commands are accepted
    Connected,
    /// Attempt failed or connection lost; waiting out the backoff
    Disconnected,
    /// `stop()` was called; terminal
    Stopped,
}

/// A command tagged with the connection it was accepted for.
struct Outbound {
    generation: u64,
    command: Command,
}

struct Status {
    state: SupervisorState,
    /// Incremented on every successful connect
    generation: u64,
    stopped: bool,
    /// Present while the supervision loop runs
    commands: Option<mpsc::Sender<Outbound>>,
}

enum SessionEnd {
    Lost,
    Stopped,
}

struct Shared<C: Connector> {
    config: LinkConfig,
    keepalive: Option<Command>,
    connector: C,
    sink: Arc<dyn EventSink>,
    status: Mutex<Status>,
    state_tx: watch::Sender<SupervisorState>,
    shutdown_tx: watch::Sender<bool>,
}

/// Maintains best-effort continuous connectivity to one device.
///
/// The supervision loop runs as a single Tokio task:
///
/// ```text
/// Idle ─start()─▶ Connecting ─open ok─▶ Connected
///                     │                     │ send failed / liveness poll
///                     ▼ open failed         ▼
///                 Disconnected ◀────────────┘
///                     │ backoff
///                     └──▶ Connecting ...      stop() ─▶ Stopped
/// ```
///
/// Loss of the connection is noticed on the next failed write or the next
/// liveness poll (`poll_interval_ms`), not the instant the peer goes away.
/// A device that stops reading but keeps the socket open is detected once a
/// write stalls for `send_timeout_ms`; configure `keepalive_command` so that
/// happens even when no commands are being sent.
///
/// Commands are delivered at most once. [`submit_command`](Self::submit_command)
/// rejects commands while not connected, and commands still queued when a
/// connection is lost are dropped rather than replayed on the next one.
pub struct ConnectionSupervisor<C: Connector = TcpConnector> {
    shared: Arc<Shared<C>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor<TcpConnector> {
    /// Create a supervisor that talks plain TCP.
    pub fn new(config: LinkConfig, sink: impl EventSink + 'static) -> Result<Self, ConfigError> {
        let connector = TcpConnector::new(config.connect_timeout());
        Self::with_connector(config, connector, sink)
    }
}

impl<C: Connector> ConnectionSupervisor<C> {
    /// Create a supervisor that opens transports through `connector`.
    pub fn with_connector(
        config: LinkConfig,
        connector: C,
        sink: impl EventSink + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let keepalive = config.keepalive()?;
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                keepalive,
                connector,
                sink: Arc::new(sink),
                status: Mutex::new(Status {
                    state: SupervisorState::Idle,
                    generation: 0,
                    stopped: false,
                    commands: None,
                }),
                state_tx,
                shutdown_tx,
            }),
            handle: Mutex::new(None),
        })
    }

    /// Begin supervising the device. Calling it again while running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, target: impl Into<Target>) -> Result<(), SupervisorError> {
        let mut status = self.shared.lock_status();
        if status.stopped {
            return Err(SupervisorError::Stopped);
        }
        if status.commands.is_some() {
            debug!("Supervisor already running, ignoring start()");
            return Ok(());
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SupervisorError::NoRuntime)?;

        let (commands_tx, commands_rx) = mpsc::channel(self.shared.config.command_queue_capacity);
        status.commands = Some(commands_tx);
        drop(status);

        let target = target.into();
        let shared = self.shared.clone();
        let handle = runtime.spawn(async move { shared.run(target, commands_rx).await });
        *lock(&self.handle) = Some(handle);

        info!("Device link supervisor started");
        Ok(())
    }

    /// Signal the loop to stop.
    ///
    /// No lifecycle event is delivered after this returns. The loop tears
    /// down at its next suspension point; an in-flight connection attempt is
    /// allowed to finish and is then closed. Use [`join`](Self::join) to wait.
    pub fn stop(&self) {
        let mut status = self.shared.lock_status();
        if status.stopped {
            return;
        }
        status.stopped = true;
        let was_running = status.commands.take().is_some();
        if !was_running {
            status.state = SupervisorState::Stopped;
            self.shared.state_tx.send_replace(SupervisorState::Stopped);
        }
        drop(status);

        self.shared.shutdown_tx.send_replace(true);
        info!("Device link supervisor stopping");
    }

    /// Wait for the supervision loop to exit.
    pub async fn join(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Supervisor task ended abnormally: {}", e);
        }
    }

    /// Hand a command to the supervision loop without waiting for I/O.
    ///
    /// Returns `true` if the supervisor is connected and the command was
    /// queued for the current connection; otherwise the command is dropped.
    pub fn submit_command(&self, command: Command) -> bool {
        let status = self.shared.lock_status();
        if status.stopped || status.state != SupervisorState::Connected {
            debug!("Not connected, dropping command: {}", command);
            return false;
        }
        let Some(commands) = status.commands.as_ref() else {
            return false;
        };

        match commands.try_send(Outbound {
            generation: status.generation,
            command,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(outbound)) => {
                warn!("Command queue full, dropping command: {}", outbound.command);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Like [`submit_command`](Self::submit_command), for raw text.
    /// Text containing a line terminator is rejected.
    pub fn submit_line(&self, text: &str) -> bool {
        match Command::new(text) {
            Ok(command) => self.submit_command(command),
            Err(e) => {
                warn!("Rejecting command {:?}: {}", text, e);
                false
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        self.shared.lock_status().state
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state_tx.subscribe()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }
}

impl<C: Connector> Drop for ConnectionSupervisor<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Connector> Shared<C> {
    fn lock_status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    fn is_stopped(&self) -> bool {
        self.lock_status().stopped
    }

    /// Move to `state` and deliver `event`, unless stop was requested.
    ///
    /// Runs under the status lock so that nothing is delivered once
    /// `stop()` has returned.
    fn transition(&self, state: SupervisorState, event: Option<LifecycleEvent>) -> bool {
        let mut status = self.lock_status();
        if status.stopped {
            return false;
        }
        status.state = state;
        self.state_tx.send_replace(state);
        if let Some(event) = event {
            self.sink.deliver(event);
        }
        true
    }

    /// Enter `Connected` and return the new connection generation.
    fn mark_connected(&self) -> Option<u64> {
        let mut status = self.lock_status();
        if status.stopped {
            return None;
        }
        status.generation += 1;
        status.state = SupervisorState::Connected;
        self.state_tx.send_replace(SupervisorState::Connected);
        self.sink.deliver(LifecycleEvent::Connected);
        Some(status.generation)
    }

    fn emit(&self, event: LifecycleEvent) {
        let status = self.lock_status();
        if !status.stopped {
            self.sink.deliver(event);
        }
    }

    fn finish(&self) {
        let mut status = self.lock_status();
        status.state = SupervisorState::Stopped;
        status.commands = None;
        self.state_tx.send_replace(SupervisorState::Stopped);
    }

    async fn run(&self, target: Target, mut commands: mpsc::Receiver<Outbound>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let backoff = self.config.backoff_delay();

        loop {
            if !self.transition(SupervisorState::Connecting, Some(LifecycleEvent::Connecting)) {
                break;
            }

            let Some(endpoint) = self.resolve(&target).await else {
                warn!("No device found");
                if !self.transition(SupervisorState::Disconnected, Some(LifecycleEvent::Disconnected)) {
                    break;
                }
                if wait_backoff(backoff, &mut shutdown).await {
                    break;
                }
                continue;
            };

            if self.is_stopped() {
                break;
            }

            match self.connector.open(&endpoint).await {
                Ok(mut transport) => {
                    let Some(generation) = self.mark_connected() else {
                        debug!("Stop requested while connecting, closing {}", endpoint);
                        transport.close().await;
                        break;
                    };
                    info!("Device link connected to {}", endpoint);

                    let end = self
                        .session(&mut transport, generation, &mut shutdown, &mut commands)
                        .await;
                    if let SessionEnd::Stopped = end {
                        transport.close().await;
                        break;
                    }
                    let still_running = self.transition(
                        SupervisorState::Disconnected,
                        Some(LifecycleEvent::Disconnected),
                    );
                    transport.close().await;
                    if !still_running {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", endpoint, e);
                    if !self.transition(SupervisorState::Disconnected, Some(LifecycleEvent::Disconnected)) {
                        break;
                    }
                }
            }

            info!("Retrying connection in {:.1}s", backoff.as_secs_f64());
            if wait_backoff(backoff, &mut shutdown).await {
                break;
            }
        }

        self.finish();
        info!("Device link supervisor stopped");
    }

    async fn resolve(&self, target: &Target) -> Option<Endpoint> {
        match target {
            Target::Static(endpoint) => Some(endpoint.clone()),
            Target::Discover(provider) => {
                let found = provider.discover().await?;
                info!("Device found at {}", found);
                self.emit(LifecycleEvent::DeviceFound(found.clone()));
                Some(found)
            }
        }
    }

    /// Serve one connection until it is lost or stop is requested.
    async fn session(
        &self,
        transport: &mut C::Transport,
        generation: u64,
        shutdown: &mut watch::Receiver<bool>,
        commands: &mut mpsc::Receiver<Outbound>,
    ) -> SessionEnd {
        let mut poll = interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        poll.tick().await;

        let mut keepalive = self.keepalive.as_ref().map(|_| {
            let period = self.config.keepalive_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(shutdown) => return SessionEnd::Stopped,

                Some(outbound) = commands.recv() => {
                    if outbound.generation != generation {
                        debug!("Discarding command queued for an earlier connection: {}", outbound.command);
                        continue;
                    }
                    if let Some(end) = self.deliver(transport, &outbound.command, shutdown).await {
                        return end;
                    }
                }

                _ = poll.tick() => {
                    if !transport.is_connected() {
                        warn!("Connection to {} lost", transport.endpoint());
                        return SessionEnd::Lost;
                    }
                }

                _ = tick_if_enabled(&mut keepalive) => {
                    if let Some(command) = &self.keepalive
                        && let Some(end) = self.deliver(transport, command, shutdown).await
                    {
                        return end;
                    }
                }
            }
        }
    }

    /// Write one command. `Some` ends the session.
    ///
    /// A device that stops reading fills the socket buffer and stalls the
    /// write, so it is bounded by `send_timeout_ms` and abandoned as soon as
    /// stop is requested.
    async fn deliver(
        &self,
        transport: &mut C::Transport,
        command: &Command,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<SessionEnd> {
        let sent = tokio::select! {
            biased;

            _ = stop_requested(shutdown) => {
                debug!("Stop requested while sending {:?}", command.as_str());
                return Some(SessionEnd::Stopped);
            }

            sent = timeout(self.config.send_timeout(), transport.send(command)) => sent,
        };

        match sent {
            Ok(Ok(())) => {
                trace!("Forwarded command: {}", command);
                None
            }
            Ok(Err(e)) => {
                warn!("Sending {:?} to {} failed: {}", command.as_str(), transport.endpoint(), e);
                Some(SessionEnd::Lost)
            }
            Err(_) => {
                let e = SendError::TimedOut {
                    timeout_ms: self.config.send_timeout_ms,
                };
                warn!("Sending {:?} to {} failed: {}", command.as_str(), transport.endpoint(), e);
                Some(SessionEnd::Lost)
            }
        }
    }
}

/// Sleep for the backoff delay. Returns `true` if stop was requested.
async fn wait_backoff(backoff: tokio::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(backoff) => false,
        _ = stop_requested(shutdown) => true,
    }
}

/// Resolves once the shutdown flag is set.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // Sender dropped: nothing can request a stop any more
            std::future::pending::<()>().await;
        }
    }
}

async fn tick_if_enabled(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
