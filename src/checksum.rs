//! V5 envelope checksum.
//!
//! `checksum(bytes) = (sum bytes) mod 256`, applied to the envelope's byte
//! range `[1, len-2)` on both build and verify.

/// One-byte additive checksum over `bytes`. Empty input yields 0.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
