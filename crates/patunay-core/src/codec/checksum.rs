//! Payload checksum stored after the frame body.

/// Two's-complement of the 8-bit sum of `payload`.
///
/// Adding the checksum to the sum of the payload bytes yields zero
/// (mod 256), which is how [`verify`] checks it.
pub fn compute(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Returns `true` when `checksum` matches `payload`.
pub fn verify(payload: &[u8], checksum: u8) -> bool {
    payload
        .iter()
        .fold(checksum, |acc, &b| acc.wrapping_add(b))
        == 0
}
