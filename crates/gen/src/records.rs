//! Corpus record shapes.
//!
//! The fixed on-disk/in-memory layout of the emitted image. Field order,
//! sizes and offsets are the format contract between the generator and the
//! runner; all multi-byte fields are little-endian and every pointer field is
//! a 64-bit *nominal* address (valued as if the image were loaded at address
//! zero).
//!
//! # Image Structure
//!
//! ```text
//! +--------------------+ 0
//! | Corpus             | header + snap pointer array descriptor
//! +--------------------+
//! | Snap pointer array | one u64 per snapshot
//! +--------------------+
//! | Snap records       |
//! +--------------------+
//! | MemoryBytes records| pointer-bearing
//! +--------------------+
//! | MemoryMapping recs |
//! | byte data          |
//! | id strings         | pointer-free
//! | register blocks    |
//! | page data          |
//! +--------------------+
//! ```

use snapcorpus_core::RegisterChecksum;

/// Magic at the start of every corpus image: `\x7fSNPCORP`.
pub const CORPUS_MAGIC: u64 = u64::from_le_bytes(*b"\x7fSNPCORP");

/// Natural alignment of every record type in this module.
pub const RECORD_ALIGNMENT: u64 = 8;

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

/// An array inside the image: element count plus nominal pointer to the
/// first element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayDescriptor {
    /// Number of elements.
    pub size: u64,
    /// Nominal address of the first element.
    pub elements: u64,
}

impl ArrayDescriptor {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.elements.to_le_bytes());
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        ArrayDescriptor {
            size: read_u64(buf, 0),
            elements: read_u64(buf, 8),
        }
    }
}

/// Register state as stored in a Snap: nominal pointers to the deduplicated
/// floating-point and general-purpose register blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterStateView {
    /// Nominal address of the floating-point register block.
    pub fpregs: u64,
    /// Nominal address of the general-purpose register block.
    pub gregs: u64,
}

impl RegisterStateView {
    /// Encoded size in bytes; recorded in the header as
    /// `register_state_type_size`.
    pub const SIZE: usize = 16;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.fpregs.to_le_bytes());
        buf[8..16].copy_from_slice(&self.gregs.to_le_bytes());
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        RegisterStateView {
            fpregs: read_u64(buf, 0),
            gregs: read_u64(buf, 8),
        }
    }
}

/// Corpus header (40 bytes).
///
/// Self-describing enough for a consumer to reject images built with a
/// different record layout, architecture or word width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusHeader {
    /// Must equal [`CORPUS_MAGIC`].
    pub magic: u64,
    /// Size of this header; rejects layout drift.
    pub header_size: u32,
    /// CRC32 over the whole image with this field zeroed.
    pub checksum: u32,
    /// Total image size in bytes.
    pub num_bytes: u64,
    /// `size_of` the Corpus record used to lay out the image.
    pub corpus_type_size: u32,
    /// `size_of` the Snap record used to lay out the image.
    pub snap_type_size: u32,
    /// `size_of` the register state view used to lay out the image.
    pub register_state_type_size: u32,
    /// Architecture of every snap in the corpus.
    pub architecture_id: u8,
}

impl CorpusHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 40;

    /// Byte offset of the checksum field within the image.
    ///
    /// The corpus checksum is computed with the four bytes at this offset
    /// treated as zero, so the value can be stored without perturbing it.
    pub const CHECKSUM_OFFSET: usize = 12;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.header_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[24..28].copy_from_slice(&self.corpus_type_size.to_le_bytes());
        buf[28..32].copy_from_slice(&self.snap_type_size.to_le_bytes());
        buf[32..36].copy_from_slice(&self.register_state_type_size.to_le_bytes());
        buf[36] = self.architecture_id;
        buf[37..40].fill(0);
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        CorpusHeader {
            magic: read_u64(buf, 0),
            header_size: read_u32(buf, 8),
            checksum: read_u32(buf, Self::CHECKSUM_OFFSET),
            num_bytes: read_u64(buf, 16),
            corpus_type_size: read_u32(buf, 24),
            snap_type_size: read_u32(buf, 28),
            register_state_type_size: read_u32(buf, 32),
            architecture_id: buf[36],
        }
    }
}

/// Top-level corpus record: header plus the snap pointer array.
///
/// The array's elements are nominal `const Snap*` pointers, one per
/// snapshot, in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusRecord {
    /// Image header.
    pub header: CorpusHeader,
    /// Pointer array over the Snap records.
    pub snaps: ArrayDescriptor,
}

impl CorpusRecord {
    /// Encoded size in bytes; recorded in the header as `corpus_type_size`.
    pub const SIZE: usize = CorpusHeader::SIZE + ArrayDescriptor::SIZE;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        self.header.write_to(&mut buf[0..CorpusHeader::SIZE]);
        self.snaps.write_to(&mut buf[CorpusHeader::SIZE..]);
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        CorpusRecord {
            header: CorpusHeader::from_bytes(&buf[0..CorpusHeader::SIZE]),
            snaps: ArrayDescriptor::from_bytes(&buf[CorpusHeader::SIZE..]),
        }
    }
}

/// The in-image representation of one snapshot (104 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapRecord {
    /// Nominal address of the NUL-terminated snapshot id.
    pub id: u64,
    /// Array of MemoryMapping records.
    pub memory_mappings: ArrayDescriptor,
    /// Entry register state.
    pub registers: RegisterStateView,
    /// Address of the expected final instruction.
    pub end_state_instruction_address: u64,
    /// Expected end-state register state.
    pub end_state_registers: RegisterStateView,
    /// Array of expected end-state MemoryBytes records.
    pub end_state_memory_bytes: ArrayDescriptor,
    /// Expected end-state register checksum.
    pub end_state_register_checksum: RegisterChecksum,
    /// Checksum of the entry register blocks as stored in the image.
    pub registers_memory_checksum: u32,
    /// Checksum of the end-state register blocks as stored in the image.
    pub end_state_registers_memory_checksum: u32,
}

impl SnapRecord {
    /// Encoded size in bytes; recorded in the header as `snap_type_size`.
    pub const SIZE: usize = 104;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        self.memory_mappings.write_to(&mut buf[8..24]);
        self.registers.write_to(&mut buf[24..40]);
        buf[40..48].copy_from_slice(&self.end_state_instruction_address.to_le_bytes());
        self.end_state_registers.write_to(&mut buf[48..64]);
        self.end_state_memory_bytes.write_to(&mut buf[64..80]);
        buf[80..96].copy_from_slice(&self.end_state_register_checksum.serialize());
        buf[96..100].copy_from_slice(&self.registers_memory_checksum.to_le_bytes());
        buf[100..104].copy_from_slice(&self.end_state_registers_memory_checksum.to_le_bytes());
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        SnapRecord {
            id: read_u64(buf, 0),
            memory_mappings: ArrayDescriptor::from_bytes(&buf[8..24]),
            registers: RegisterStateView::from_bytes(&buf[24..40]),
            end_state_instruction_address: read_u64(buf, 40),
            end_state_registers: RegisterStateView::from_bytes(&buf[48..64]),
            end_state_memory_bytes: ArrayDescriptor::from_bytes(&buf[64..80]),
            end_state_register_checksum: RegisterChecksum::deserialize(&buf[80..96])
                .unwrap_or_default(),
            registers_memory_checksum: read_u32(buf, 96),
            end_state_registers_memory_checksum: read_u32(buf, 100),
        }
    }
}

/// The in-image representation of one memory mapping (40 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMappingRecord {
    /// First address of the mapping at runtime.
    pub start_address: u64,
    /// Mapping size in bytes.
    pub num_bytes: u64,
    /// `mprotect` permission bits.
    pub perms: u32,
    /// Checksum over the mapping's memory payloads, in stored order.
    pub memory_checksum: u32,
    /// Array of MemoryBytes records backing the mapping.
    pub memory_bytes: ArrayDescriptor,
}

impl MemoryMappingRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 40;

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.start_address.to_le_bytes());
        buf[8..16].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[16..20].copy_from_slice(&self.perms.to_le_bytes());
        buf[20..24].copy_from_slice(&self.memory_checksum.to_le_bytes());
        self.memory_bytes.write_to(&mut buf[24..40]);
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        MemoryMappingRecord {
            start_address: read_u64(buf, 0),
            num_bytes: read_u64(buf, 8),
            perms: read_u32(buf, 16),
            memory_checksum: read_u32(buf, 20),
            memory_bytes: ArrayDescriptor::from_bytes(&buf[24..40]),
        }
    }
}

/// Content encoding of a MemoryBytes record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBytesData {
    /// Stored bytes: element count and nominal pointer to the payload.
    ByteValues {
        /// Payload length in bytes.
        size: u64,
        /// Nominal address of the payload.
        elements: u64,
    },
    /// Repeating run: one byte value repeated `size` times; no stored bytes.
    ByteRun {
        /// The repeated byte value.
        value: u8,
        /// Run length in bytes.
        size: u64,
    },
}

/// The in-image representation of one memory payload (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBytesRecord {
    /// First address covered at runtime.
    pub start_address: u64,
    /// Payload encoding.
    pub data: MemoryBytesData,
}

impl MemoryBytesRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 32;

    /// Flag bit marking a repeating-run encoding.
    pub const FLAG_REPEATING: u64 = 1;

    /// Flags word derived from the payload encoding.
    pub fn flags(&self) -> u64 {
        match self.data {
            MemoryBytesData::ByteValues { .. } => 0,
            MemoryBytesData::ByteRun { .. } => Self::FLAG_REPEATING,
        }
    }

    /// Run length or stored-payload length in bytes.
    pub fn num_bytes(&self) -> u64 {
        match self.data {
            MemoryBytesData::ByteValues { size, .. } => size,
            MemoryBytesData::ByteRun { size, .. } => size,
        }
    }

    /// Serialize into `buf` (exactly [`Self::SIZE`] bytes).
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.start_address.to_le_bytes());
        buf[8..16].copy_from_slice(&self.flags().to_le_bytes());
        match self.data {
            MemoryBytesData::ByteValues { size, elements } => {
                buf[16..24].copy_from_slice(&size.to_le_bytes());
                buf[24..32].copy_from_slice(&elements.to_le_bytes());
            }
            MemoryBytesData::ByteRun { value, size } => {
                buf[16..24].copy_from_slice(&u64::from(value).to_le_bytes());
                buf[24..32].copy_from_slice(&size.to_le_bytes());
            }
        }
    }

    /// Deserialize from `buf` (exactly [`Self::SIZE`] bytes).
    ///
    /// Only the repeating-run flag bit is interpreted; other flag bits are
    /// reserved and read as a stored-bytes encoding.
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), Self::SIZE);
        let flags = read_u64(buf, 8);
        let data = if flags & Self::FLAG_REPEATING != 0 {
            MemoryBytesData::ByteRun {
                value: buf[16],
                size: read_u64(buf, 24),
            }
        } else {
            MemoryBytesData::ByteValues {
                size: read_u64(buf, 16),
                elements: read_u64(buf, 24),
            }
        };
        MemoryBytesRecord {
            start_address: read_u64(buf, 0),
            data,
        }
    }
}
