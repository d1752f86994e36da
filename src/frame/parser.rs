//! Response envelope parser.
//!
//! Performs a fixed sequence of structural checks, aborting on the first
//! failure. Field reads use bounds-checked accessors so a malformed-but-
//! past-the-size-check frame can never panic the caller.

use super::{RESPONSE_CONTROL_CODE, START_MARKER, END_MARKER, V5_RESPONSE_MIN_LEN};
use crate::checksum::checksum;
use crate::error::{FrameErrorKind, SolarmanError};

/// A response envelope that has passed every structural check in §4.C.
///
/// Only constructible via [`parse_response_frame`]. Owns a copy of the full
/// frame bytes; [`ValidatedResponse::modbus_frame`] is a bounded slice into
/// that copy, so no reference escapes the struct's own lifetime.
#[derive(Debug, Clone)]
pub struct ValidatedResponse {
    raw: Vec<u8>,
    modbus_start: usize,
    modbus_end: usize,
    sequence: u16,
    serial: u32,
    frame_type: u8,
    status: u8,
    total_working_time: u32,
    power_on_time: u32,
    offset_time: u32,
}

impl ValidatedResponse {
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn total_working_time(&self) -> u32 {
        self.total_working_time
    }

    pub fn power_on_time(&self) -> u32 {
        self.power_on_time
    }

    pub fn offset_time(&self) -> u32 {
        self.offset_time
    }

    /// The embedded Modbus RTU frame, including its trailing CRC.
    pub fn modbus_frame(&self) -> &[u8] {
        &self.raw[self.modbus_start..self.modbus_end]
    }
}

fn read_u16_le(frame: &[u8], offset: usize) -> Option<u16> {
    frame
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(frame: &[u8], offset: usize) -> Option<u32> {
    frame
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Validate and project `frame`, a complete candidate V5 response envelope,
/// into a [`ValidatedResponse`]. Checks run in a fixed order; the first
/// failure determines the returned error.
pub fn parse_response_frame(frame: &[u8]) -> Result<ValidatedResponse, SolarmanError> {
    // 1. Minimum size.
    if frame.len() < V5_RESPONSE_MIN_LEN {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::FrameTooShort));
    }

    // 2. Markers.
    if frame[0] != START_MARKER {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::InvalidStartByte));
    }
    if frame[frame.len() - 1] != END_MARKER {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::InvalidEndByte));
    }

    // 3. Length cross-check.
    let declared_len = read_u16_le(frame, 1).ok_or(SolarmanError::V5FrameError(
        FrameErrorKind::FrameTooShort,
    ))? as usize;
    if frame.len() != declared_len + 13 {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::LengthMismatch));
    }

    // 4. Checksum.
    let computed = checksum(&frame[1..frame.len() - 2]);
    if computed != frame[frame.len() - 2] {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::InvalidChecksum));
    }

    // 5. Control code.
    let control = read_u16_le(frame, 3).ok_or(SolarmanError::V5FrameError(
        FrameErrorKind::FrameTooShort,
    ))?;
    if control != RESPONSE_CONTROL_CODE {
        return Err(SolarmanError::V5FrameError(
            FrameErrorKind::InvalidControlCode,
        ));
    }

    let modbus_start = 25;
    let modbus_end = frame.len() - 2;

    // 6. Modbus minimum size. Structurally implied by step 1 at this fixed
    // offset; retained for defense in depth.
    if modbus_end.saturating_sub(modbus_start) < 5 {
        return Err(SolarmanError::V5FrameError(FrameErrorKind::ModbusTooShort));
    }

    let sequence = read_u16_le(frame, 5).unwrap_or(0);
    let serial = read_u32_le(frame, 7).unwrap_or(0);
    let frame_type = frame.get(11).copied().unwrap_or(0);
    let status = frame.get(12).copied().unwrap_or(0);
    let total_working_time = read_u32_le(frame, 13).unwrap_or(0);
    let power_on_time = read_u32_le(frame, 17).unwrap_or(0);
    let offset_time = read_u32_le(frame, 21).unwrap_or(0);

    Ok(ValidatedResponse {
        raw: frame.to_vec(),
        modbus_start,
        modbus_end,
        sequence,
        serial,
        frame_type,
        status,
        total_working_time,
        power_on_time,
        offset_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_frame(serial: u32, sequence: u16, rtu: &[u8]) -> Vec<u8> {
        let n = rtu.len();
        let total_len = 27 + n;
        let payload_len = (14 + n) as u16;

        let mut out = Vec::with_capacity(total_len);
        out.push(0xA5);
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&RESPONSE_CONTROL_CODE.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&serial.to_le_bytes());
        out.push(0x02); // frame type
        out.push(0x01); // status = OK
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(rtu);
        let cksum = checksum(&out[1..]);
        out.push(cksum);
        out.push(END_MARKER);
        out
    }

    #[test]
    fn round_trip_structural_fields() {
        let rtu = [0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xD4];
        let frame = response_frame(0x1234_5678, 0x0042, &rtu);

        let parsed = parse_response_frame(&frame).unwrap();
        assert_eq!(parsed.sequence(), 0x0042);
        assert_eq!(parsed.serial(), 0x1234_5678);
        assert_eq!(parsed.status(), 0x01);
        assert_eq!(parsed.modbus_frame(), &rtu);
    }

    #[test]
    fn round_trip_holds_across_varying_serial_sequence_and_payload_length() {
        let cases: [(u32, u16, &[u8]); 3] = [
            (0xFFFF_FFFF, 0xFFFF, &[0x01, 0x03, 0x00, 0x00, 0x00]),
            (0x1234_5678, 0x0042, &[0x01; 64]),
            (0x0000_0000, 0x0001, &[0x02; 512]),
        ];
        for (serial, sequence, rtu) in cases {
            let frame = response_frame(serial, sequence, rtu);
            let parsed = parse_response_frame(&frame).unwrap();
            assert_eq!(parsed.sequence(), sequence);
            assert_eq!(parsed.serial(), serial);
            assert_eq!(parsed.modbus_frame(), rtu);
        }
    }

    #[test]
    fn reject_invalid_start() {
        let mut frame = vec![0u8; 34];
        frame[0] = 0x00;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::InvalidStartByte)
        ));
    }

    #[test]
    fn reject_length_mismatch() {
        let rtu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let mut frame = response_frame(0x1234_5678, 1, &rtu);
        frame[1] = 0xFF;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::LengthMismatch)
        ));
    }

    #[test]
    fn reject_frame_too_short() {
        let frame = vec![0xA5; 10];
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::FrameTooShort)
        ));
    }

    #[test]
    fn reject_bad_checksum() {
        let rtu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let mut frame = response_frame(0x1234_5678, 1, &rtu);
        let last = frame.len() - 2;
        frame[last] ^= 0xFF;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::InvalidChecksum)
        ));
    }

    #[test]
    fn reject_bad_end_marker() {
        let rtu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let mut frame = response_frame(0x1234_5678, 1, &rtu);
        let last = frame.len() - 1;
        frame[last] = 0x00;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::InvalidEndByte)
        ));
    }

    #[test]
    fn reject_wrong_control_code() {
        let rtu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let mut frame = response_frame(0x1234_5678, 1, &rtu);
        // Flip control code to the request-echo value 0x4510.
        frame[3] = 0x10;
        frame[4] = 0x45;
        let cksum = checksum(&frame[1..frame.len() - 2]);
        let last = frame.len() - 2;
        frame[last] = cksum;
        let err = parse_response_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            SolarmanError::V5FrameError(FrameErrorKind::InvalidControlCode)
        ));
    }
}
