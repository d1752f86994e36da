//! Error taxonomy for the Solarman V5 client.
//!
//! A closed set of error kinds, each with a stable short label and a
//! `retryable()` classification the request engine consults on every failed
//! attempt.

use thiserror::Error;

/// Result type for solarman-v5 operations.
pub type Result<T> = std::result::Result<T, SolarmanError>;

/// Structural failure kinds produced while validating a V5 envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameErrorKind {
    #[error("frame shorter than the minimum response size")]
    FrameTooShort,
    #[error("start byte is not 0xA5")]
    InvalidStartByte,
    #[error("end byte is not 0x15")]
    InvalidEndByte,
    #[error("declared length does not match frame size")]
    LengthMismatch,
    #[error("checksum byte does not match the computed checksum")]
    InvalidChecksum,
    #[error("control code is not 0x1510")]
    InvalidControlCode,
    #[error("embedded Modbus payload is smaller than 5 bytes")]
    ModbusTooShort,
    /// Streaming decoder only: declared length field is 0.
    #[error("declared payload length is less than 1")]
    InvalidLength,
    /// Streaming decoder only: total frame size exceeds 1024.
    #[error("frame size exceeds the 1024-byte limit")]
    FrameTooLarge,
    /// Streaming decoder only: transport closed with an
    /// incomplete frame still buffered.
    #[error("transport closed with an incomplete frame buffered")]
    IncompleteFrameAtEof,
}

/// Solarman V5 client errors. A closed, non-exhaustive-free set.
#[derive(Debug, Error)]
pub enum SolarmanError {
    /// Not in `Connected` and reconnect policy forbids reconnecting.
    #[error("not connected")]
    NotConnected,

    /// `connect()` called while already `Connected`.
    #[error("already connected")]
    AlreadyConnected,

    /// Transport failed to establish.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation exceeded the configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// Transport write/read failure.
    #[error("io error: {0}")]
    IoError(String),

    /// Transport became inactive while a request was outstanding.
    #[error("channel closed")]
    ChannelClosed,

    /// A structural check on the response envelope failed.
    #[error("v5 frame error: {0}")]
    V5FrameError(FrameErrorKind),

    /// Low-byte sequence disagreement between request and response.
    #[error("sequence mismatch: expected {expected:#06x}, got {got:#06x}")]
    SequenceMismatch { expected: u16, got: u16 },

    /// Modbus CRC, length, unit, function, or byte-count disagreement.
    #[error("rtu error: {0}")]
    RtuError(String),

    /// The device returned a Modbus exception PDU.
    #[error("modbus exception: {0:#04x}")]
    ModbusException(u8),

    /// An argument failed its per-operation range check.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl SolarmanError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        SolarmanError::ConnectionFailed(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        SolarmanError::IoError(msg.into())
    }

    pub fn rtu(msg: impl Into<String>) -> Self {
        SolarmanError::RtuError(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        SolarmanError::InvalidParameter(msg.into())
    }

    /// Stable short label, used as the observability hook metric tag.
    pub fn label(&self) -> &'static str {
        match self {
            SolarmanError::NotConnected => "not_connected",
            SolarmanError::AlreadyConnected => "already_connected",
            SolarmanError::ConnectionFailed(_) => "connection_failed",
            SolarmanError::Timeout => "timeout",
            SolarmanError::IoError(_) => "io_error",
            SolarmanError::ChannelClosed => "channel_closed",
            SolarmanError::V5FrameError(_) => "v5_frame_error",
            SolarmanError::SequenceMismatch { .. } => "sequence_mismatch",
            SolarmanError::RtuError(_) => "rtu_error",
            SolarmanError::ModbusException(_) => "modbus_exception",
            SolarmanError::InvalidParameter(_) => "invalid_parameter",
        }
    }

    /// The request engine's retry loop consults this, and only this, to
    /// decide whether to consume a retry attempt.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SolarmanError::ConnectionFailed(_)
                | SolarmanError::Timeout
                | SolarmanError::IoError(_)
                | SolarmanError::ChannelClosed
        )
    }
}

impl From<std::io::Error> for SolarmanError {
    fn from(err: std::io::Error) -> Self {
        SolarmanError::IoError(err.to_string())
    }
}
