//! Little-endian integer PCM sample codec and saturation helpers

/// Decode one signed little-endian sample of `bytes.len()` bytes (1..=4)
#[inline]
pub fn decode_sample(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => i64::from(bytes[0] as i8),
        2 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        // Sign-extend by placing the 24 bits in the top of an i32
        3 => i64::from(i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8),
        4 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => 0,
    }
}

/// Encode `value` into `out` using `out.len()` bytes (1..=4), little-endian
///
/// The value must already be within range for the width.
#[inline]
pub fn encode_sample(value: i64, out: &mut [u8]) {
    let bytes = (value as i32).to_le_bytes();
    let width = out.len().min(4);
    out[..width].copy_from_slice(&bytes[..width]);
}

/// Symmetric saturation bound for a sample depth: `2^(bits-1) - 1`
#[inline]
pub fn clip_limit(bits_per_sample: u16) -> i64 {
    (1i64 << (bits_per_sample.clamp(1, 32) - 1)) - 1
}

/// Saturate to `[-limit, limit]`
#[inline]
pub fn clip(value: i64, limit: i64) -> i64 {
    value.clamp(-limit, limit)
}
