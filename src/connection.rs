//! Connection lifecycle.
//!
//! A small state cell guarding a transport handle that only exists while
//! `Connected`. `close()` is idempotent and always ends in `Disconnected`,
//! from any starting state, mirroring the teardown guarantee production
//! Modbus connection managers provide.
//!
//! The transport is split into independent read/write halves on connect:
//! the write half stays here, written to synchronously by each request; the
//! read half is handed to a background task (spawned by
//! [`crate::client::Client::connect`]) that continuously feeds the
//! streaming decoder and completes the response gate. This is what makes
//! component E (the stream decoder) and component G (the response gate)
//! actually run concurrently with the request path, rather than requiring
//! each caller to drive the read loop itself.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SolarmanError};

/// Lifecycle state of a [`crate::client::Client`]'s transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "DISCONNECTED"),
            ClientState::Connecting => write!(f, "CONNECTING"),
            ClientState::Connected => write!(f, "CONNECTED"),
            ClientState::Disconnecting => write!(f, "DISCONNECTING"),
        }
    }
}

/// Owns the write half of the transport and the bookkeeping around it:
/// state cell, last-activity timestamp, the background reader task's
/// handle, and a consecutive-error counter distinct from the per-request
/// retry budget, tripped by repeated retryable failures across calls
/// rather than within a single one.
pub struct Connection {
    state: ClientState,
    writer: Option<OwnedWriteHalf>,
    reader_task: Option<JoinHandle<()>>,
    last_activity: Option<Instant>,
    consecutive_errors: u32,
    reconnect_delay: Option<Duration>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ClientState::Disconnected,
            writer: None,
            reader_task: None,
            last_activity: None,
            consecutive_errors: 0,
            reconnect_delay: None,
        }
    }

    /// Current exponential-backoff delay, if one is in progress. `None`
    /// means either no backoff has started yet or the last attempt
    /// succeeded and reset it.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay
    }

    /// Record the delay to use on the *next* backoff sleep.
    pub fn set_reconnect_delay(&mut self, delay: Option<Duration>) {
        self.reconnect_delay = delay;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Establish the TCP transport and split it. Returns the read half so
    /// the caller (the [`crate::client::Client`]) can spawn the background
    /// reader task and hand its [`JoinHandle`] back via
    /// [`Connection::set_reader_task`]. Fails `AlreadyConnected` unless the
    /// connection is currently `Disconnected`.
    pub async fn connect(
        &mut self,
        config: &ClientConfig,
    ) -> Result<tokio::net::tcp::OwnedReadHalf> {
        if self.state != ClientState::Disconnected {
            return Err(SolarmanError::AlreadyConnected);
        }
        self.state = ClientState::Connecting;

        let addr = format!("{}:{}", config.host(), config.port());
        debug!(addr = %addr, "connecting");

        let stream = match timeout(config.operation_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ClientState::Disconnected;
                error!(addr = %addr, error = %e, "connect failed");
                return Err(SolarmanError::connection_failed(e.to_string()));
            }
            Err(_) => {
                self.state = ClientState::Disconnected;
                warn!(addr = %addr, "connect timed out");
                return Err(SolarmanError::ConnectionFailed(format!(
                    "connecting to {addr} timed out"
                )));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }

        let (read_half, write_half) = stream.into_split();
        self.writer = Some(write_half);
        self.state = ClientState::Connected;
        self.last_activity = Some(Instant::now());
        self.consecutive_errors = 0;
        self.reconnect_delay = None;
        info!(addr = %addr, "connected");
        Ok(read_half)
    }

    /// Record the background reader task's handle so [`Connection::close`]
    /// can abort it on teardown.
    pub fn set_reader_task(&mut self, handle: JoinHandle<()>) {
        self.reader_task = Some(handle);
    }

    /// Idempotent teardown, safe from any state. Always ends `Disconnected`.
    /// Called by the owning [`crate::client::Client`]; aborts the
    /// background reader task if one is registered.
    pub async fn close(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        self.state = ClientState::Disconnecting;
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.state = ClientState::Disconnected;
        info!("disconnected");
    }

    /// Lighter-weight teardown used by the reader task itself when it
    /// observes EOF, a transport error, or a decoder failure. Does not
    /// abort `reader_task`, since that would be the task aborting itself.
    /// Just drops the writer and marks the state `Disconnected`.
    pub async fn mark_disconnected_from_reader(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader_task = None;
        self.state = ClientState::Disconnected;
        info!("disconnected (reader task observed transport closure)");
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
    }

    pub fn idle_for(&self) -> Option<Duration> {
        self.last_activity.map(|t| t.elapsed())
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(SolarmanError::NotConnected)?;
        writer.write_all(bytes).await?;
        self.touch();
        Ok(())
    }
}
