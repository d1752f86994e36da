//! Modbus RTU construction and parsing.
//!
//! The eight standard function codes are delegated to `rmodbus`: this
//! module's job there is building request PDUs, validating each call's
//! parameters against the allowed range before ever touching the wire, and
//! translating `rmodbus`'s own error type into the crate's closed taxonomy.
//! Mask write (0x16) and the two raw-frame operations have no `rmodbus`
//! generator, so their PDUs are assembled and their responses validated by
//! hand instead. The two shapes are distinct types ([`TypedRtuRequest`],
//! [`RawRtuRequest`]) rather than one type with an `Option<ModbusRequest>`
//! field, so the typed parse functions always have a real `ModbusRequest`
//! to call `parse_ok` on, with nothing to unwrap.

use std::fmt::Debug;

use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;

use crate::error::{Result, SolarmanError};
use crate::frame::crc16_modbus;

fn invalid(msg: impl Into<String>) -> SolarmanError {
    SolarmanError::invalid_parameter(msg)
}

fn check_range(count: u16, range: std::ops::RangeInclusive<u16>, what: &str) -> Result<()> {
    if range.contains(&count) {
        Ok(())
    } else {
        Err(invalid(format!(
            "{what}: count {count} outside allowed range {}..={}",
            range.start(),
            range.end()
        )))
    }
}

/// Common accessor for the built RTU bytes, regardless of whether the
/// request carries `rmodbus`-tracked state or not. `dispatch_raw` and
/// `call` in `client.rs` are generic over this trait so the V5 envelope
/// builder doesn't care which kind of request it's wrapping.
pub trait RtuFrame {
    fn bytes(&self) -> &[u8];
}

/// One outstanding Modbus request built through `rmodbus`, for the eight
/// function codes it has a generator for. Keeps the `ModbusRequest` `rmodbus`
/// needs to validate the matching response via `parse_ok`.
pub struct TypedRtuRequest {
    request: ModbusRequest,
    pub bytes: Vec<u8>,
}

impl RtuFrame for TypedRtuRequest {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One outstanding Modbus request assembled and validated by hand: mask
/// write (0x16) and the two caller-supplied raw-frame operations, none of
/// which `rmodbus` has a generator for.
pub struct RawRtuRequest {
    pub bytes: Vec<u8>,
}

impl RtuFrame for RawRtuRequest {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn new_request(unit_id: u8) -> ModbusRequest {
    ModbusRequest::new(unit_id, ModbusProto::Rtu)
}

fn map_build_err(function_code: u8, err: impl Debug) -> SolarmanError {
    SolarmanError::rtu(format!("fc {function_code:#04x} build failed: {err:?}"))
}

fn map_parse_err(function_code: u8, err: impl Debug) -> SolarmanError {
    SolarmanError::rtu(format!("fc {function_code:#04x} parse failed: {err:?}"))
}

/// A Modbus exception response carries the original function code with its
/// high bit set, followed by a one-byte exception code. Checked directly
/// against the raw bytes so exception detection never depends on the exact
/// shape of `rmodbus`'s own error type.
fn exception_code(response: &[u8], function_code: u8) -> Option<u8> {
    if response.len() >= 3 && response.get(1) == Some(&(function_code | 0x80)) {
        Some(response[2])
    } else {
        None
    }
}

pub fn read_holding_registers(unit_id: u8, addr: u16, count: u16) -> Result<TypedRtuRequest> {
    check_range(count, 1..=125, "read holding registers")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_get_holdings(addr, count, &mut bytes)
        .map_err(|e| map_build_err(0x03, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn read_input_registers(unit_id: u8, addr: u16, count: u16) -> Result<TypedRtuRequest> {
    check_range(count, 1..=125, "read input registers")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_get_inputs(addr, count, &mut bytes)
        .map_err(|e| map_build_err(0x04, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn read_coils(unit_id: u8, addr: u16, count: u16) -> Result<TypedRtuRequest> {
    check_range(count, 1..=2000, "read coils")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_get_coils(addr, count, &mut bytes)
        .map_err(|e| map_build_err(0x01, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn read_discrete_inputs(unit_id: u8, addr: u16, count: u16) -> Result<TypedRtuRequest> {
    check_range(count, 1..=2000, "read discrete inputs")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_get_discretes(addr, count, &mut bytes)
        .map_err(|e| map_build_err(0x02, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn write_single_register(unit_id: u8, addr: u16, value: u16) -> Result<TypedRtuRequest> {
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_set_holding(addr, value, &mut bytes)
        .map_err(|e| map_build_err(0x06, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn write_multiple_registers(unit_id: u8, addr: u16, values: &[u16]) -> Result<TypedRtuRequest> {
    check_range(values.len() as u16, 1..=123, "write multiple registers")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8 + values.len() * 2);
    request
        .generate_set_holdings_bulk(addr, values, &mut bytes)
        .map_err(|e| map_build_err(0x10, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn write_single_coil(unit_id: u8, addr: u16, value: bool) -> Result<TypedRtuRequest> {
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8);
    request
        .generate_set_coil(addr, value, &mut bytes)
        .map_err(|e| map_build_err(0x05, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

pub fn write_multiple_coils(unit_id: u8, addr: u16, values: &[bool]) -> Result<TypedRtuRequest> {
    check_range(values.len() as u16, 1..=1968, "write multiple coils")?;
    let mut request = new_request(unit_id);
    let mut bytes = Vec::with_capacity(8 + values.len() / 8 + 1);
    request
        .generate_set_coils_bulk(addr, values, &mut bytes)
        .map_err(|e| map_build_err(0x0F, e))?;
    Ok(TypedRtuRequest { request, bytes })
}

/// Parse a response to a register-reading request (function 0x03/0x04).
pub fn parse_registers(req: &mut TypedRtuRequest, response: &[u8], function_code: u8) -> Result<Vec<u16>> {
    if let Some(code) = exception_code(response, function_code) {
        return Err(SolarmanError::ModbusException(code));
    }
    req.request
        .parse_ok(response)
        .map_err(|e| map_parse_err(function_code, e))?;
    Ok(response[3..response.len() - 2]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Parse a response to a bit-reading request (function 0x01/0x02).
pub fn parse_bits(
    req: &mut TypedRtuRequest,
    response: &[u8],
    count: u16,
    function_code: u8,
) -> Result<Vec<bool>> {
    if let Some(code) = exception_code(response, function_code) {
        return Err(SolarmanError::ModbusException(code));
    }
    req.request
        .parse_ok(response)
        .map_err(|e| map_parse_err(function_code, e))?;
    let mut values: Vec<bool> = response[3..response.len() - 2]
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (byte & (1 << i)) != 0))
        .collect();
    values.truncate(count as usize);
    if values.len() != count as usize {
        return Err(SolarmanError::rtu(format!(
            "fc {function_code:#04x}: short bit response"
        )));
    }
    Ok(values)
}

/// Parse a response to a write-style request (0x05/0x06/0x0F/0x10); the
/// device echoes the request, there is no payload to extract beyond the
/// ok/exception distinction.
pub fn parse_write_ack(req: &mut TypedRtuRequest, response: &[u8], function_code: u8) -> Result<()> {
    if let Some(code) = exception_code(response, function_code) {
        return Err(SolarmanError::ModbusException(code));
    }
    req.request
        .parse_ok(response)
        .map_err(|e| map_parse_err(function_code, e))
}

/// Mask-write register, function 0x16. No `rmodbus` generator exists for
/// this function, so the PDU is assembled by hand: unit id, function code,
/// address, AND mask, OR mask, all big-endian per the Modbus RTU wire
/// format, followed by the CRC-16.
pub fn mask_write_register(unit_id: u8, addr: u16, and_mask: u16, or_mask: u16) -> Result<RawRtuRequest> {
    let mut bytes = Vec::with_capacity(10);
    bytes.push(unit_id);
    bytes.push(0x16);
    bytes.extend_from_slice(&addr.to_be_bytes());
    bytes.extend_from_slice(&and_mask.to_be_bytes());
    bytes.extend_from_slice(&or_mask.to_be_bytes());
    let crc = crc16_modbus(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(RawRtuRequest { bytes })
}

/// Append the Modbus CRC to a caller-supplied pre-CRC RTU frame (`unit id,
/// function code, data`). `frame` must be at least 2 bytes (unit id and
/// function code, with no data).
pub fn raw_rtu_crc_appended(frame: &[u8]) -> Result<RawRtuRequest> {
    if frame.len() < 2 {
        return Err(invalid("raw rtu (crc appended): frame must be at least 2 bytes"));
    }
    let mut bytes = frame.to_vec();
    let crc = crc16_modbus(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(RawRtuRequest { bytes })
}

/// Pass a caller-supplied RTU frame through unmodified; the frame is
/// assumed to already carry its own trailing CRC. `frame` must be at least
/// 4 bytes (unit id, function code, 2-byte CRC).
pub fn raw_rtu_crc_included(frame: &[u8]) -> Result<RawRtuRequest> {
    if frame.len() < 4 {
        return Err(invalid("raw rtu (crc included): frame must be at least 4 bytes"));
    }
    Ok(RawRtuRequest { bytes: frame.to_vec() })
}

/// Validate a raw/mask-write response by hand: unit id, function code (or
/// its exception-flagged counterpart), and CRC. Returns the data bytes
/// between the function code and the CRC. Used for the operations that
/// have no `rmodbus`-tracked [`ModbusRequest`] behind them.
pub fn parse_raw(response: &[u8], unit_id: u8, function_code: u8) -> Result<Vec<u8>> {
    if response.len() < 4 {
        return Err(SolarmanError::rtu("raw response shorter than 4 bytes"));
    }
    if let Some(code) = exception_code(response, function_code) {
        return Err(SolarmanError::ModbusException(code));
    }
    if response[0] != unit_id {
        return Err(SolarmanError::rtu(format!(
            "unit id mismatch: expected {unit_id}, got {}",
            response[0]
        )));
    }
    if response[1] != function_code {
        return Err(SolarmanError::rtu(format!(
            "function code mismatch: expected {function_code:#04x}, got {:#04x}",
            response[1]
        )));
    }
    let body = &response[..response.len() - 2];
    let stored = u16::from_le_bytes([response[response.len() - 2], response[response.len() - 1]]);
    if crc16_modbus(body) != stored {
        return Err(SolarmanError::rtu("invalid modbus CRC"));
    }
    Ok(response[2..response.len() - 2].to_vec())
}
