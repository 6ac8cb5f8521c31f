//! End-state register checksum record.
//!
//! Snapshots carry the expected end-state register checksum as an opaque
//! blob. Its decoded form is stored verbatim in every Snap record so the
//! runner can compare register state without holding full register contents.
//!
//! # Serialized Layout (16 bytes, little-endian)
//!
//! ```text
//! [register_groups: u64][checksum: u32][reserved: u32 = 0]
//! ```
//!
//! The empty blob is also valid and decodes to the default value (no register
//! groups summarized); older snapshots predate the checksum entirely.

/// Size of a serialized register checksum in bytes.
pub const REGISTER_CHECKSUM_BYTES: usize = 16;

/// Checksum summary of an end-state register set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterChecksum {
    /// Bit set naming the register groups covered by `checksum`.
    pub register_groups: u64,
    /// Checksum over the covered groups.
    pub checksum: u32,
}

impl RegisterChecksum {
    /// Serialize to the 16-byte wire form.
    pub fn serialize(&self) -> [u8; REGISTER_CHECKSUM_BYTES] {
        let mut bytes = [0u8; REGISTER_CHECKSUM_BYTES];
        bytes[0..8].copy_from_slice(&self.register_groups.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize from a snapshot blob.
    ///
    /// Returns `None` for anything that is not empty or exactly
    /// [`REGISTER_CHECKSUM_BYTES`] long with a zero reserved field.
    pub fn deserialize(bytes: &[u8]) -> Option<RegisterChecksum> {
        if bytes.is_empty() {
            return Some(RegisterChecksum::default());
        }
        if bytes.len() != REGISTER_CHECKSUM_BYTES {
            return None;
        }
        let reserved = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if reserved != 0 {
            return None;
        }
        Some(RegisterChecksum {
            register_groups: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }
}
