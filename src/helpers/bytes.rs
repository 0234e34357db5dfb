//! Little-endian decoding of the fixed-width integers and floats found in binary
//! spreadsheet containers.
//!
//! Callers always slice at least the decoded width; a shorter slice is a bug in the
//! caller, not malformed input, so the conversions panic rather than return errors.

/// Decodes a byte slice as consecutive little-endian `u32` sector identifiers.
/// A trailing partial chunk is ignored.
pub(crate) fn to_u32_iter(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Same as [`to_u32_iter`] widened to `usize`.
pub(crate) fn to_usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    to_u32_iter(bytes).map(|value| value as usize)
}

#[inline]
pub(crate) fn to_u16(s: &[u8]) -> u16 {
    u16::from_le_bytes([s[0], s[1]])
}

#[inline]
pub(crate) fn to_u32(s: &[u8]) -> u32 {
    u32::from_le_bytes([s[0], s[1], s[2], s[3]])
}

#[inline]
pub(crate) fn to_usize(s: &[u8]) -> usize {
    to_u32(s) as usize
}

#[inline]
pub(crate) fn to_u64(s: &[u8]) -> u64 {
    u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
}

#[inline]
pub(crate) fn to_f64(s: &[u8]) -> f64 {
    f64::from_bits(to_u64(s))
}
