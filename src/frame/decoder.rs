//! Streaming frame decoder.
//!
//! Accumulates bytes from the transport and extracts one complete V5 frame
//! at a time. No resynchronization: V5 rides on a reliable TCP stream, so a
//! desync indicates a serious fault and the connection must be torn down
//! rather than heuristically recovered.

use tracing::trace;

use crate::error::{FrameErrorKind, SolarmanError};
use super::MAX_FRAME_SIZE;

/// Outcome of feeding bytes to the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete frame was extracted and removed from the buffer.
    Frame(Vec<u8>),
    /// Not enough bytes buffered yet to determine or complete a frame.
    NeedMoreData,
}

/// Accumulates inbound bytes and emits complete V5 frames.
///
/// One [`FrameDecoder`] per connection. Feeding advances by at least three
/// bytes before committing to a frame size; a single call to
/// [`FrameDecoder::decode`] either emits exactly one frame, reports that
/// more data is needed, or fails outright.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append freshly-read transport bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered and not yet emitted as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract one complete frame from the current buffer.
    pub fn decode(&mut self) -> Result<DecodeOutcome, SolarmanError> {
        if self.buffer.len() < 3 {
            return Ok(DecodeOutcome::NeedMoreData);
        }

        if self.buffer[0] != super::START_MARKER {
            return Err(SolarmanError::V5FrameError(FrameErrorKind::InvalidStartByte));
        }

        let declared_len = u16::from_le_bytes([self.buffer[1], self.buffer[2]]) as usize;
        if declared_len < 1 {
            return Err(SolarmanError::V5FrameError(FrameErrorKind::InvalidLength));
        }

        let total_size = declared_len + 13;
        if total_size > MAX_FRAME_SIZE {
            return Err(SolarmanError::V5FrameError(FrameErrorKind::FrameTooLarge));
        }

        if self.buffer.len() < total_size {
            return Ok(DecodeOutcome::NeedMoreData);
        }

        let frame: Vec<u8> = self.buffer.drain(..total_size).collect();
        trace!(frame_len = frame.len(), "decoded one V5 frame");
        Ok(DecodeOutcome::Frame(frame))
    }

    /// Call when the transport has closed. Fails if bytes remain buffered
    /// that never completed a frame.
    pub fn finish(&self) -> Result<(), SolarmanError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(SolarmanError::V5FrameError(
                FrameErrorKind::IncompleteFrameAtEof,
            ))
        }
    }
}
