#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_stream::try_stream;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::config::{Config, HeartbeatConfig};
use super::error::WsError;
use super::history::MessageHistory;
use super::machine::{ABNORMAL_CLOSURE, Action, ConnectionMachine, NO_STATUS_RECEIVED};
use super::traits::MessageParser;
use crate::error::Kind;
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Upper bound on writing our close frame or flushing the peer's close reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection status as seen by consumers.
///
/// The variant is the authoritative state. [`ConnectionStatus::label`] renders
/// a display string that is not meant to be matched on.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected, and no retry pending
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting for the backoff delay before the next attempt
    Reconnecting {
        /// One-based number of the pending attempt
        attempt: u32,
        /// Attempt ceiling
        max_attempts: u32,
        /// Backoff delay before the attempt
        delay: Duration,
        /// When the attempt will be issued
        retry_at: Instant,
    },
    /// The transport reported an error
    Error,
    /// Automatic reconnection gave up; only a manual reconnect recovers
    Failed {
        /// Attempts made before giving up
        attempts: u32,
    },
}

impl ConnectionStatus {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Human-readable label, with a countdown while a retry is pending.
    #[must_use]
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connecting => f.write_str("Connecting..."),
            Self::Connected { .. } => f.write_str("Connected"),
            Self::Reconnecting {
                attempt,
                max_attempts,
                retry_at,
                ..
            } => {
                let remaining = retry_at.saturating_duration_since(Instant::now());
                let secs = remaining.as_millis().div_ceil(1000);
                write!(
                    f,
                    "Reconnecting in {secs}s... (attempt {attempt}/{max_attempts})"
                )
            }
            Self::Error => f.write_str("Connection error"),
            Self::Failed { attempts } => {
                write!(f, "Connection failed after {attempts} attempts")
            }
        }
    }
}

/// Requests from the handle to the driver task.
#[derive(Debug)]
enum Command {
    Send(String),
    Reconnect,
    Shutdown,
}

/// Owns one logical WebSocket connection and keeps it alive.
///
/// A background task holds the transport, the pending retry timer and the
/// [`ConnectionMachine`]. It reconnects after abnormal closures using
/// exponential backoff until the configured attempt ceiling, after which the
/// status stays [`ConnectionStatus::Failed`] until [`Self::reconnect`] is
/// called. Dropping the manager closes the connection with code 1000.
///
/// # Type Parameters
///
/// - `M`: Payload type produced by the parser
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```rust, no_run
/// use debate_ws_client::ws::{ConnectionManager, JsonParser};
/// use debate_ws_client::ws::config::Config;
///
/// # async fn example() -> debate_ws_client::Result<()> {
/// let connection = ConnectionManager::new(
///     "wss://debates.example.com/ws",
///     Config::default(),
///     JsonParser::<serde_json::Value>::new(),
/// )?;
///
/// let mut rx = connection.subscribe();
/// while let Ok(message) = rx.recv().await {
///     println!("{} | {message}", connection.status());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    endpoint: Url,
    /// Watch channel receiver for status changes
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Sender channel for requests to the driver task
    command_tx: mpsc::UnboundedSender<Command>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<M>,
    /// Bounded history, written only by the driver task
    history: Arc<RwLock<MessageHistory<M>>>,
    task: Option<JoinHandle<()>>,
    _phantom: PhantomData<P>,
}

impl<M, P> ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    /// Create a new connection manager and start connecting.
    ///
    /// Must be called from within a tokio runtime. The endpoint must be a
    /// `ws://` or `wss://` URL.
    pub fn new(endpoint: &str, config: Config, parser: P) -> Result<Self> {
        config.validate()?;

        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported WebSocket scheme `{}`",
                endpoint.scheme()
            )));
        }

        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let machine = ConnectionMachine::new(&config);
        let status_rx = machine.status_receiver();
        let history = machine.history();

        let driver = Driver {
            endpoint: endpoint.as_str().to_owned(),
            heartbeat: config.heartbeat,
            machine,
            parser,
            command_rx,
            broadcast_tx: broadcast_tx.clone(),
        };
        let task = runtime.spawn(driver.run());

        Ok(Self {
            endpoint,
            status_rx,
            command_tx,
            broadcast_tx,
            history,
            task: Some(task),
            _phantom: PhantomData,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Serialize `message` as JSON and transmit it if connected.
    ///
    /// Returns `Ok(false)` without sending when the connection is not up.
    /// Nothing is queued for later delivery.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<bool> {
        let json = serde_json::to_string(message)?;

        if !self.status().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::warn!(status = %self.status(), "WebSocket is not connected, message not sent");
            return Ok(false);
        }

        Ok(self.command_tx.send(Command::Send(json)).is_ok())
    }

    /// Reset the attempt counter and connect again immediately.
    ///
    /// Any pending retry is cancelled and any open transport is closed with
    /// code 1000 first. Works from every state, including
    /// [`ConnectionStatus::Failed`].
    pub fn reconnect(&self) -> Result<()> {
        self.command_tx
            .send(Command::Reconnect)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Close the connection with code 1000 and wait for the driver to stop.
    pub async fn shutdown(mut self) -> Result<()> {
        _ = self.command_tx.send(Command::Shutdown);

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::with_source(Kind::Internal, e))?;
        }

        Ok(())
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to connection status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Most recently received payload.
    #[must_use]
    pub fn latest(&self) -> Option<M> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
            .cloned()
    }

    /// Retained payloads, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<M> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive messages concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.broadcast_tx.subscribe()
    }

    /// Incoming messages as a stream.
    ///
    /// The stream yields [`WsError::Lagged`] and ends if the consumer falls
    /// more than the broadcast capacity behind, and ends when the manager is
    /// dropped.
    pub fn messages(&self) -> impl Stream<Item = Result<M>> + use<M, P> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        yield message;
                    }
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("WebSocket subscriber lagged, missed {count} messages");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl<M, P> Drop for ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    fn drop(&mut self) {
        if self.task.is_some() {
            _ = self.command_tx.send(Command::Shutdown);
        }
    }
}

/// Background task owning the transport and the retry timer.
struct Driver<M, P> {
    endpoint: String,
    heartbeat: Option<HeartbeatConfig>,
    machine: ConnectionMachine<M>,
    parser: P,
    command_rx: mpsc::UnboundedReceiver<Command>,
    broadcast_tx: broadcast::Sender<M>,
}

impl<M, P> Driver<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    async fn run(mut self) {
        let mut action = self.machine.start();

        loop {
            action = match action {
                Action::Connect => self.connect().await,
                Action::Retry(delay) => self.wait_retry(delay).await,
                Action::Idle => self.idle().await,
                Action::Stop => break,
            };
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "WebSocket driver stopped");
    }

    /// Open a transport, then serve it until it closes.
    async fn connect(&mut self) -> Action {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "Opening WebSocket");

        let connecting = connect_async(self.endpoint.clone());
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok((ws_stream, _)) => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(endpoint = %self.endpoint, "WebSocket connected");
                            self.machine.on_open();
                            self.handle_connection(ws_stream).await
                        }
                        Err(e) => {
                            let error = Error::with_source(Kind::WebSocket, WsError::Connection(e));
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Unable to connect: {error:?}");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &error;
                            self.machine.on_error();
                            self.machine.on_close(ABNORMAL_CLOSURE)
                        }
                    };
                }

                // Dropping `connecting` abandons the in-flight attempt
                command = self.command_rx.recv() => {
                    if let Some(action) = self.offline_command(command) {
                        return action;
                    }
                }
            }
        }
    }

    /// Handle an active WebSocket connection.
    async fn handle_connection(&mut self, ws_stream: WsStream) -> Action {
        let (mut write, mut read) = ws_stream.split();
        let mut heartbeat = self.heartbeat.map(Heartbeat::new);

        loop {
            tokio::select! {
                // Handle incoming messages
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");
                            self.ingest(text.as_bytes());
                        }
                        Some(Ok(Message::Binary(bytes))) => self.ingest(&bytes),
                        Some(Ok(Message::Pong(_))) => {
                            if let Some(heartbeat) = heartbeat.as_mut() {
                                heartbeat.on_pong();
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code));
                            flush_close_reply(&mut write).await;
                            return self.machine.on_close(code);
                        }
                        Some(Ok(_)) => {
                            // PINGs are answered by tungstenite; raw frames are not surfaced.
                        }
                        Some(Err(e)) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "WebSocket transport error");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                            self.machine.on_error();
                            return self.machine.on_close(ABNORMAL_CLOSURE);
                        }
                        None => return self.machine.on_close(ABNORMAL_CLOSURE),
                    }
                }

                // Handle requests from the manager handle
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Send(text)) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(error = %e, "Failed to send WebSocket message");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &e;
                                self.machine.on_error();
                                return self.machine.on_close(ABNORMAL_CLOSURE);
                            }
                        }
                        Some(Command::Reconnect) => {
                            close_normally(&mut write).await;
                            return self.machine.reconnect();
                        }
                        Some(Command::Shutdown) | None => {
                            close_normally(&mut write).await;
                            return self.machine.teardown();
                        }
                    }
                }

                beat = next_beat(heartbeat.as_mut()) => {
                    match beat {
                        Beat::Ping => {
                            if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(error = %e, "Failed to send heartbeat PING");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &e;
                                self.machine.on_error();
                                return self.machine.on_close(ABNORMAL_CLOSURE);
                            }
                        }
                        Beat::Waiting => {}
                        Beat::TimedOut => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Heartbeat timeout: no PONG received");
                            return self.machine.on_close(ABNORMAL_CLOSURE);
                        }
                    }
                }
            }
        }
    }

    /// Wait out the backoff delay. Dropping the sleep cancels the retry.
    async fn wait_retry(&mut self, delay: Duration) -> Action {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return self.machine.on_retry_elapsed(),

                command = self.command_rx.recv() => {
                    if let Some(action) = self.offline_command(command) {
                        return action;
                    }
                }
            }
        }
    }

    /// No retry pending; only a command moves the machine.
    async fn idle(&mut self) -> Action {
        loop {
            let command = self.command_rx.recv().await;
            if let Some(action) = self.offline_command(command) {
                return action;
            }
        }
    }

    /// Commands received while no transport is open.
    fn offline_command(&mut self, command: Option<Command>) -> Option<Action> {
        match command {
            Some(Command::Send(text)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, status = %self.machine.status(), "WebSocket is not connected, message dropped");
                #[cfg(not(feature = "tracing"))]
                let _ = &text;
                None
            }
            Some(Command::Reconnect) => Some(self.machine.reconnect()),
            Some(Command::Shutdown) | None => Some(self.machine.teardown()),
        }
    }

    fn ingest(&mut self, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Ok(message) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(?message, "Parsed WebSocket message");
                self.machine.on_message(message.clone());
                _ = self.broadcast_tx.send(message);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Failed to parse WebSocket message, dropping frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Send a 1000 close frame, giving up after [`CLOSE_TIMEOUT`].
async fn close_normally<S>(write: &mut S)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };

    match timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Failed to send close frame");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
        Err(_elapsed) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Timed out sending close frame");
        }
    }
}

/// Write out the close reply queued after the peer's close frame.
async fn flush_close_reply(write: &mut WsSink) {
    if let Ok(Err(e)) = timeout(CLOSE_TIMEOUT, write.flush()).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %e, "Failed to flush close reply");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    /// Send a PING now
    Ping,
    /// A PING is outstanding but still within the timeout
    Waiting,
    /// The outstanding PING was never answered
    TimedOut,
}

/// PING/PONG monitor for one connection.
struct Heartbeat {
    timeout: Duration,
    ticker: Interval,
    awaiting_since: Option<Instant>,
}

impl Heartbeat {
    fn new(config: HeartbeatConfig) -> Self {
        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            timeout: config.timeout,
            ticker,
            awaiting_since: None,
        }
    }

    async fn tick(&mut self) -> Beat {
        self.ticker.tick().await;

        match self.awaiting_since {
            Some(sent) if sent.elapsed() >= self.timeout => Beat::TimedOut,
            Some(_) => Beat::Waiting,
            None => {
                self.awaiting_since = Some(Instant::now());
                Beat::Ping
            }
        }
    }

    fn on_pong(&mut self) {
        self.awaiting_since = None;
    }
}

async fn next_beat(heartbeat: Option<&mut Heartbeat>) -> Beat {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => std::future::pending().await,
    }
}
