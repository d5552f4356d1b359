//! # Session Connection
//!
//! Owns the one persistent WebSocket between the chat widget and the server.
//!
//! ## Contract:
//! - **open(url)**: Start connecting in the background; reconnects itself after
//!   unexpected closures
//! - **send(frame)**: Write one frame if the socket is `Open`, otherwise fail fast with
//!   `SessionError::NotConnected` (frames are never buffered across outages)
//! - **on_frame(handler)**: Receive inbound text frames and lifecycle events
//! - **close()**: Explicit close; the only way the reconnect loop stops
//!
//! A connect attempt that has not finished its handshake within the connect timeout is
//! abandoned and retried like any other failed attempt.
//!
//! ## Handshake:
//! Right after every successful (re)open, before the state flips to `Open`, the current
//! agent/personality goes out as a `session_update` frame. Nothing the user sends can
//! overtake it.
//!
//! ## Transport:
//! The socket itself comes from a [`Connector`]. Production uses
//! [`TungsteniteConnector`]; tests plug in an in-memory transport.

use crate::config::{Backoff, ConnectionConfig};
use crate::error::{SessionError, SessionResult};
use crate::protocol::OutboundFrame;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outgoing half of a connected transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SessionError> + Send>>;

/// Incoming half of a connected transport. An `Err` item or the end of the stream
/// means the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = SessionResult<String>> + Send>>;

/// Something that can open a text-frame transport to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> SessionResult<(FrameSink, FrameStream)>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> SessionResult<(FrameSink, FrameStream)> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(SessionError::from)
            .with(|text: String| future::ready(Ok::<_, SessionError>(Message::Text(text.into()))));

        // Only text frames carry protocol data. Ping/pong is answered by tungstenite.
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(reason)) => Some(Err(SessionError::Connection(format!(
                    "server closed the socket: {:?}",
                    reason
                )))),
                Ok(_) => None,
                Err(err) => Some(Err(SessionError::from(err))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Socket state as seen by callers of [`SessionConnection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle and data events delivered to the `on_frame` handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt is starting (attempt 0 is the initial open)
    Connecting { attempt: u32 },
    /// Handshake done, `send` now works
    Opened,
    /// One inbound text frame
    Frame(String),
    /// Socket went away; `unexpected` is false only after `close()`
    Closed { unexpected: bool, reason: String },
    /// A reconnect attempt will start after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
}

pub type FrameHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before each reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        match config.backoff {
            Backoff::Fixed => ReconnectPolicy::Fixed(config.reconnect_delay()),
            Backoff::Exponential => ReconnectPolicy::Exponential {
                base: config.reconnect_delay(),
                max: config.max_reconnect_delay(),
            },
        }
    }

    /// Delay before consecutive attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { base, max } => {
                let exp = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exp).min(max)
            }
        }
    }
}

/// State shared between the handle and the background supervisor task.
struct Shared {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    handshake: OutboundFrame,
}

/// Owned handle to the session's single WebSocket.
pub struct SessionConnection {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    handler: FrameHandler,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SessionConnection {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy, agent: &str, personality: &str) -> Self {
        Self {
            connector,
            policy,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Closed,
                outbound: None,
                handshake: OutboundFrame::SessionUpdate {
                    agent: agent.to_string(),
                    personality: personality.to_string(),
                },
            })),
            handler: Arc::new(|event| debug!("Connection event with no handler: {:?}", event)),
            shutdown: None,
            task: None,
        }
    }

    /// Bound on how long a single connect attempt may take.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Register the receiver for inbound frames and lifecycle events.
    /// Takes effect on the next `open`.
    pub fn on_frame<F>(&mut self, handler: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
    }

    /// Change the agent/personality announced after every (re)open.
    pub fn set_profile(&self, agent: &str, personality: &str) {
        lock(&self.shared).handshake = OutboundFrame::SessionUpdate {
            agent: agent.to_string(),
            personality: personality.to_string(),
        };
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start the background connect/reconnect loop.
    pub fn open(&mut self, url: &str) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("open() called while the connection loop is already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let supervisor = Supervisor {
            url: url.to_string(),
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            connect_timeout: self.connect_timeout,
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
            shutdown: shutdown_rx,
        };

        info!(url = %url, "Opening chat session connection");
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    /// Send one frame. Fails with `NotConnected` unless the socket is `Open`.
    pub fn send(&self, frame: &OutboundFrame) -> SessionResult<()> {
        let json = frame.to_json()?;
        let shared = lock(&self.shared);

        if shared.state != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }

        match &shared.outbound {
            Some(tx) => tx.send(json).map_err(|_| SessionError::NotConnected),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Close explicitly. No reconnect follows.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let mut shared = lock(&self.shared);
        shared.state = ConnectionState::Closed;
        shared.outbound = None;
        info!("Chat session connection closed by client");
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

/// A poisoned lock only means another task panicked mid-update; the data is still usable.
fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Why one connected period ended.
enum Ended {
    Explicit,
    Unexpected(String),
}

/// Background task that owns the transport.
struct Supervisor {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    handler: FrameHandler,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    fn emit(&self, event: ConnectionEvent) {
        (self.handler)(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let mut shared = lock(&self.shared);
        shared.state = state;
        if state != ConnectionState::Open {
            shared.outbound = None;
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run(mut self) {
        // Consecutive failed attempts; reset by every successful open.
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Connecting { attempt });

            let connected = tokio::select! {
                result = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.url)) => {
                    match result {
                        Ok(result) => result,
                        Err(_) => Err(SessionError::Connection(format!(
                            "connect timed out after {}ms",
                            self.connect_timeout.as_millis()
                        ))),
                    }
                }
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok((sink, stream)) => match self.serve(sink, stream).await {
                    Ended::Explicit => {
                        self.set_state(ConnectionState::Closed);
                        self.emit(ConnectionEvent::Closed {
                            unexpected: false,
                            reason: "closed by client".to_string(),
                        });
                        return;
                    }
                    Ended::Unexpected(reason) => {
                        attempt = 0;
                        self.set_state(ConnectionState::Closed);
                        warn!(reason = %reason, "Chat connection closed unexpectedly");
                        self.emit(ConnectionEvent::Closed { unexpected: true, reason });
                    }
                },
                Err(err) => {
                    self.set_state(ConnectionState::Closed);
                    warn!(error = %err, "Chat connection attempt failed");
                    self.emit(ConnectionEvent::Closed {
                        unexpected: true,
                        reason: err.to_string(),
                    });
                }
            }

            if self.shutdown_requested() {
                break;
            }

            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!("Connection supervisor stopped");
    }

    /// Drive one connected period: handshake, then pump frames both ways.
    async fn serve(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> Ended {
        let handshake = {
            let shared = lock(&self.shared);
            shared.handshake.to_json()
        };

        let handshake = match handshake {
            Ok(json) => json,
            Err(err) => return Ended::Unexpected(err.to_string()),
        };

        if let Err(err) = sink.send(handshake).await {
            return Ended::Unexpected(format!("handshake failed: {}", err));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        {
            let mut shared = lock(&self.shared);
            shared.outbound = Some(tx);
            shared.state = ConnectionState::Open;
        }
        info!(url = %self.url, "Chat connection open");
        self.emit(ConnectionEvent::Opened);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = sink.close().await;
                    return Ended::Explicit;
                }
                Some(text) = rx.recv() => {
                    if let Err(err) = sink.send(text).await {
                        return Ended::Unexpected(format!("write failed: {}", err));
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.emit(ConnectionEvent::Frame(text)),
                    Some(Err(err)) => return Ended::Unexpected(err.to_string()),
                    None => return Ended::Unexpected("stream ended".to_string()),
                },
            }
        }
    }
}
