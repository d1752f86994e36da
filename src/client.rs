//! Request engine: the public surface most callers use.
//!
//! Serializes all calls through a single in-flight request at a time, via
//! a dedicated request lock held across the whole round trip. Builds the
//! Modbus RTU PDU, wraps it in a V5 envelope, dispatches it, and retries
//! retryable failures up to the configured budget.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connection::{ClientState, Connection};
use crate::error::{Result, SolarmanError};
use crate::frame::{
    build_request_frame, correct_double_crc, parse_response_frame, DecodeOutcome, FrameDecoder,
};
use crate::gate::ResponseGate;
use crate::observability::{Observer, TracingObserver};
use crate::rtu;
use crate::sequence::SequenceGenerator;

/// Async client for a single logger's V5 channel.
///
/// One [`Client`] owns one transport. Cloning is not supported: callers
/// that need to share a client across tasks wrap it in an `Arc` themselves,
/// since the internal locks already serialize access correctly. `connect()`
/// spawns a background task that owns the read half of the socket, drives
/// the streaming decoder, and completes the response gate; callers never
/// drive the read path themselves.
pub struct Client {
    config: ClientConfig,
    conn: Arc<Mutex<Connection>>,
    gate: Arc<ResponseGate>,
    sequence: SequenceGenerator,
    observer: Arc<dyn Observer>,
    /// Serializes the whole build/write/await/parse/retry round trip of
    /// one `call()` invocation at a time, enforcing the single-in-flight
    /// invariant with FIFO fairness across concurrent callers.
    request_lock: Mutex<()>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: ClientConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            config,
            conn: Arc::new(Mutex::new(Connection::new())),
            gate: Arc::new(ResponseGate::new()),
            sequence: SequenceGenerator::new(),
            observer,
            request_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle state, after applying the idle watchdog check.
    /// Querying this after the idle timeout has elapsed observes
    /// `Disconnected` even without an intervening request.
    pub async fn connection_state(&self) -> ClientState {
        self.check_idle().await;
        self.conn.lock().await.state()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ClientState::Connected
    }

    /// Establish the transport. Fails `AlreadyConnected` if already
    /// connected. Spawns the background reader task that feeds the
    /// streaming decoder (§4.E) and completes the response gate (§4.G) for
    /// as long as the connection lives.
    pub async fn connect(&self) -> Result<()> {
        let read_half = {
            let mut conn = self.conn.lock().await;
            conn.connect(&self.config).await?
        };

        let gate = Arc::clone(&self.gate);
        let conn_for_reader = Arc::clone(&self.conn);
        let handle = tokio::spawn(run_reader_loop(read_half, gate, conn_for_reader));

        {
            let mut conn = self.conn.lock().await;
            conn.set_reader_task(handle);
        }

        self.observer.connect().await;
        Ok(())
    }

    /// Idempotent, safe from any state.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        conn.close().await;
        drop(conn);
        self.observer.disconnect().await;
    }

    async fn ensure_connected(&self) -> Result<()> {
        self.check_idle().await;
        let state = self.conn.lock().await.state();
        if state == ClientState::Connected {
            return Ok(());
        }
        match self.config.reconnect_policy() {
            ReconnectPolicy::Disabled => Err(SolarmanError::NotConnected),
            ReconnectPolicy::Immediate => self.connect().await,
            ReconnectPolicy::Exponential { initial, max } => {
                let delay = self
                    .conn
                    .lock()
                    .await
                    .reconnect_delay()
                    .unwrap_or(initial);
                tokio::time::sleep(delay).await;
                self.observer.reconnection_attempt().await;
                let result = self.connect().await;
                // `connect()` itself resets the delay to `None` on success;
                // on failure, double it (capped at `max`) for the next attempt.
                if result.is_err() {
                    let next = std::cmp::min(delay * 2, max);
                    self.conn.lock().await.set_reconnect_delay(Some(next));
                }
                result
            }
        }
    }

    /// Idle watchdog check: if the configured idle timeout has
    /// elapsed since the last transport activity, close before issuing a
    /// new request so the following reconnect-per-policy branch fires.
    async fn check_idle(&self) {
        let Some(idle_timeout) = self.config.idle_timeout() else {
            return;
        };
        let idle = self.conn.lock().await.idle_for();
        if let Some(idle) = idle {
            if idle >= idle_timeout {
                debug!(?idle, "idle timeout reached, closing");
                self.close().await;
            }
        }
    }

    /// One full send/await/validate round trip, with double-CRC correction
    /// retried once on a CRC-flavored `RtuError` when enabled. Returns the
    /// raw embedded Modbus bytes; does not retry at the engine level.
    ///
    /// Callers must hold `request_lock` for the duration of this call; it
    /// registers the single response-gate slot and awaits it, and a second
    /// concurrent registration would steal the first caller's reply.
    async fn dispatch_raw<R: rtu::RtuFrame>(&self, built: &R) -> Result<Vec<u8>> {
        self.ensure_connected().await?;

        let seq = self.sequence.next().await;
        let envelope = build_request_frame(self.config.logger_serial(), seq, built.bytes());
        let waiter = self.gate.register();

        {
            let mut conn = self.conn.lock().await;
            if let Err(e) = conn.write_all(&envelope).await {
                drop(conn);
                self.gate.cancel();
                return Err(e);
            }
        }

        let deadline = self.config.operation_timeout();
        let response = match timeout(deadline, waiter.wait()).await {
            Ok(Some(resp)) => resp,
            Ok(None) => return Err(SolarmanError::ChannelClosed),
            Err(_) => {
                self.gate.cancel();
                return Err(SolarmanError::Timeout);
            }
        };

        let got = response.sequence();
        if (got & 0xFF) != (seq & 0xFF) {
            return Err(SolarmanError::SequenceMismatch { expected: seq, got });
        }

        Ok(response.modbus_frame().to_vec())
    }

    /// Run one typed operation end to end: build via `build`, dispatch,
    /// apply double-CRC correction on a failed parse when enabled, and
    /// retry the whole round trip (rebuilding and redispatching) up to the
    /// configured retry budget on retryable errors.
    ///
    /// Holds `request_lock` for the entire method, across every attempt, so
    /// the device class's half-duplex single-in-flight invariant holds and
    /// concurrent callers queue up FIFO on the lock rather than racing each
    /// other's `ResponseGate` registration.
    async fn call<T, R: rtu::RtuFrame>(
        &self,
        function_code: u8,
        build: impl Fn() -> Result<R>,
        parse: impl Fn(&mut R, &[u8]) -> Result<T>,
    ) -> Result<T> {
        let _request_guard = self.request_lock.lock().await;

        let max_attempts = self.config.retries() + 1;
        let mut last_err = None;

        for attempt_no in 1..=max_attempts {
            let started = Instant::now();
            let outcome = self.try_once(&build, &parse).await;

            match outcome {
                Ok(value) => {
                    self.observer
                        .request_ok(function_code, started.elapsed())
                        .await;
                    return Ok(value);
                }
                Err(e) => {
                    self.observer.request_err(function_code, e.label()).await;
                    if !e.retryable() || attempt_no == max_attempts {
                        return Err(e);
                    }
                    warn!(attempt = attempt_no, max_attempts, error = %e, "retrying");
                    self.observer.retry(function_code).await;
                    self.conn.lock().await.record_error();
                    self.close().await;
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(SolarmanError::NotConnected))
    }

    /// `rmodbus`'s own error type is not pattern-matched here (only its
    /// `Debug` rendering is used, in `rtu::map_parse_err`), so this does not
    /// distinguish a CRC failure from a length/unit/function mismatch before
    /// attempting correction. That's safe: the corrector only changes
    /// anything when the frame both ends in two zero bytes and the
    /// truncated candidate re-validates, so applying it unconditionally on
    /// any `RtuError` is a no-op in every case that isn't a genuine
    /// double-CRC.
    async fn try_once<T, R: rtu::RtuFrame>(
        &self,
        build: &impl Fn() -> Result<R>,
        parse: &impl Fn(&mut R, &[u8]) -> Result<T>,
    ) -> Result<T> {
        let mut built = build()?;
        let modbus = self.dispatch_raw(&built).await?;

        match parse(&mut built, &modbus) {
            Ok(value) => Ok(value),
            Err(SolarmanError::RtuError(msg)) if self.config.v5_error_correction() => {
                let (candidate, corrected) = correct_double_crc(&modbus);
                if corrected {
                    parse(&mut built, &candidate)
                } else {
                    Err(SolarmanError::RtuError(msg))
                }
            }
            other => other,
        }
    }

    pub async fn read_holding_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let unit_id = self.config.unit_id();
        self.call(
            0x03,
            || rtu::read_holding_registers(unit_id, addr, count),
            |req, bytes| rtu::parse_registers(req, bytes, 0x03),
        )
        .await
    }

    pub async fn read_input_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let unit_id = self.config.unit_id();
        self.call(
            0x04,
            || rtu::read_input_registers(unit_id, addr, count),
            |req, bytes| rtu::parse_registers(req, bytes, 0x04),
        )
        .await
    }

    pub async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        let unit_id = self.config.unit_id();
        self.call(
            0x01,
            || rtu::read_coils(unit_id, addr, count),
            |req, bytes| rtu::parse_bits(req, bytes, count, 0x01),
        )
        .await
    }

    pub async fn read_discrete_inputs(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        let unit_id = self.config.unit_id();
        self.call(
            0x02,
            || rtu::read_discrete_inputs(unit_id, addr, count),
            |req, bytes| rtu::parse_bits(req, bytes, count, 0x02),
        )
        .await
    }

    pub async fn write_single_register(&self, addr: u16, value: u16) -> Result<()> {
        let unit_id = self.config.unit_id();
        self.call(
            0x06,
            || rtu::write_single_register(unit_id, addr, value),
            |req, bytes| rtu::parse_write_ack(req, bytes, 0x06),
        )
        .await
    }

    pub async fn write_multiple_registers(&self, addr: u16, values: &[u16]) -> Result<()> {
        let unit_id = self.config.unit_id();
        self.call(
            0x10,
            || rtu::write_multiple_registers(unit_id, addr, values),
            |req, bytes| rtu::parse_write_ack(req, bytes, 0x10),
        )
        .await
    }

    pub async fn write_single_coil(&self, addr: u16, value: bool) -> Result<()> {
        let unit_id = self.config.unit_id();
        self.call(
            0x05,
            || rtu::write_single_coil(unit_id, addr, value),
            |req, bytes| rtu::parse_write_ack(req, bytes, 0x05),
        )
        .await
    }

    pub async fn write_multiple_coils(&self, addr: u16, values: &[bool]) -> Result<()> {
        let unit_id = self.config.unit_id();
        self.call(
            0x0F,
            || rtu::write_multiple_coils(unit_id, addr, values),
            |req, bytes| rtu::parse_write_ack(req, bytes, 0x0F),
        )
        .await
    }

    /// Mask-write a holding register: `result = (current & and_mask) | (or_mask & !and_mask)`.
    /// Function code 0x16. No count to range-check.
    pub async fn mask_write_register(&self, addr: u16, and_mask: u16, or_mask: u16) -> Result<()> {
        let unit_id = self.config.unit_id();
        self.call(
            0x16,
            move || rtu::mask_write_register(unit_id, addr, and_mask, or_mask),
            move |_, bytes| rtu::parse_raw(bytes, unit_id, 0x16).map(|_| ()),
        )
        .await
    }

    /// Send a caller-built RTU frame (`unit id, function code, data`,
    /// without its CRC) and return the response's data bytes (stripped of
    /// unit id, function code, and CRC) after validating unit id, function
    /// code, and CRC match. `frame` must be at least 2 bytes.
    pub async fn raw_rtu_crc_appended(&self, frame: &[u8]) -> Result<Vec<u8>> {
        if frame.len() < 2 {
            return Err(SolarmanError::invalid_parameter(
                "raw rtu (crc appended): frame must be at least 2 bytes",
            ));
        }
        let unit_id = frame[0];
        let function_code = frame[1];
        let frame = frame.to_vec();
        self.call(
            function_code,
            move || rtu::raw_rtu_crc_appended(&frame),
            move |_, bytes| rtu::parse_raw(bytes, unit_id, function_code),
        )
        .await
    }

    /// Send a caller-built RTU frame that already carries its own trailing
    /// CRC, unmodified. `frame` must be at least 4 bytes.
    pub async fn raw_rtu_crc_included(&self, frame: &[u8]) -> Result<Vec<u8>> {
        if frame.len() < 4 {
            return Err(SolarmanError::invalid_parameter(
                "raw rtu (crc included): frame must be at least 4 bytes",
            ));
        }
        let unit_id = frame[0];
        let function_code = frame[1];
        let frame = frame.to_vec();
        self.call(
            function_code,
            move || rtu::raw_rtu_crc_included(&frame),
            move |_, bytes| rtu::parse_raw(bytes, unit_id, function_code),
        )
        .await
    }
}

/// Connect, run `body` against the connected client, and close the
/// transport on the way out whether `body` succeeded or failed. Not part of
/// the core request engine. A convenience for callers who otherwise have
/// to pair every `connect()` with a `close()` by hand.
pub async fn with_connection<F, Fut, T>(config: ClientConfig, body: F) -> Result<T>
where
    F: FnOnce(Arc<Client>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let client = Arc::new(Client::new(config));
    client.connect().await?;
    let result = body(Arc::clone(&client)).await;
    client.close().await;
    result
}

/// Background task spawned by [`Client::connect`]: owns the read half of
/// the socket for the lifetime of the connection, feeds every inbound
/// chunk through a [`FrameDecoder`], and hands each structurally valid
/// frame to the [`ResponseGate`]. On EOF, a read error, or a decoder
/// failure (malformed input, no resynchronization, per §4.E) it cancels
/// the gate and marks the connection disconnected, then exits.
async fn run_reader_loop(
    mut read_half: OwnedReadHalf,
    gate: Arc<ResponseGate>,
    conn: Arc<Mutex<Connection>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let read = read_half.read(&mut buf).await;
        match read {
            Ok(0) => {
                debug!("reader task observed EOF");
                gate.cancel();
                conn.lock().await.mark_disconnected_from_reader().await;
                return;
            }
            Ok(n) => {
                conn.lock().await.touch();
                decoder.feed(&buf[..n]);
            }
            Err(e) => {
                warn!(error = %e, "reader task observed a transport error");
                gate.cancel();
                conn.lock().await.mark_disconnected_from_reader().await;
                return;
            }
        }

        loop {
            match decoder.decode() {
                Ok(DecodeOutcome::Frame(frame)) => {
                    trace!(frame_len = frame.len(), "reader task decoded a frame");
                    if let Ok(parsed) = parse_response_frame(&frame) {
                        gate.complete(parsed);
                    }
                }
                Ok(DecodeOutcome::NeedMoreData) => break,
                Err(e) => {
                    warn!(error = %e, "reader task rejected malformed input, closing");
                    gate.cancel();
                    conn.lock().await.mark_disconnected_from_reader().await;
                    return;
                }
            }
        }
    }
}
