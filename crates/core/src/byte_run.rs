//! Repeating-byte-run detection.
//!
//! Constant-filled pages (zero pages above all) dominate many snapshot sets.
//! When the repeating-run option is enabled, such payloads are encoded in the
//! image as a (value, size) pair instead of stored bytes.

/// Returns true if `bytes` is non-empty and every byte has the same value.
pub fn is_repeating_byte_run(bytes: &[u8]) -> bool {
    match bytes.split_first() {
        Some((first, rest)) => rest.iter().all(|b| b == first),
        None => false,
    }
}
