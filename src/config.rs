//! Client configuration.
//!
//! An immutable record plus a builder. No layered sources: the client is
//! configured in-process by the host application, so there is nothing for a
//! figment-style provider chain to merge.

use std::time::Duration;

/// Reconnection policy consulted when a retryable failure or idle timeout
/// closes the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Never reconnect automatically; the next operation fails `NotConnected`.
    Disabled,
    /// Reconnect immediately, no backoff.
    Immediate,
    /// Exponential backoff between `initial` and `max`, doubling each
    /// attempt.
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Immediate
    }
}

/// Immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    host: String,
    port: u16,
    logger_serial: u32,
    unit_id: u8,
    operation_timeout: Duration,
    retries: u32,
    idle_timeout: Option<Duration>,
    reconnect_policy: ReconnectPolicy,
    v5_error_correction: bool,
}

impl ClientConfig {
    pub fn builder(host: impl Into<String>, logger_serial: u32) -> ClientConfigBuilder {
        ClientConfigBuilder::new(host, logger_serial)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn logger_serial(&self) -> u32 {
        self.logger_serial
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect_policy
    }

    pub fn v5_error_correction(&self) -> bool {
        self.v5_error_correction
    }
}

/// Builder for [`ClientConfig`]. Defaults: port 8899, unit id 1, a 60 s
/// operation timeout, 3 retries, a 60 s idle timeout, the `Immediate`
/// reconnect policy, and error correction enabled.
pub struct ClientConfigBuilder {
    host: String,
    port: u16,
    logger_serial: u32,
    unit_id: u8,
    operation_timeout: Duration,
    retries: u32,
    idle_timeout: Option<Duration>,
    reconnect_policy: ReconnectPolicy,
    v5_error_correction: bool,
}

impl ClientConfigBuilder {
    pub fn new(host: impl Into<String>, logger_serial: u32) -> Self {
        Self {
            host: host.into(),
            port: 8899,
            logger_serial,
            unit_id: 1,
            operation_timeout: Duration::from_secs(60),
            retries: 3,
            idle_timeout: Some(Duration::from_secs(60)),
            reconnect_policy: ReconnectPolicy::Immediate,
            v5_error_correction: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn v5_error_correction(mut self, enabled: bool) -> Self {
        self.v5_error_correction = enabled;
        self
    }

    pub fn build(self) -> ClientConfig {
        ClientConfig {
            host: self.host,
            port: self.port,
            logger_serial: self.logger_serial,
            unit_id: self.unit_id,
            operation_timeout: self.operation_timeout,
            retries: self.retries,
            idle_timeout: self.idle_timeout,
            reconnect_policy: self.reconnect_policy,
            v5_error_correction: self.v5_error_correction,
        }
    }
}
