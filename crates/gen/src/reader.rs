//! Consumer-side corpus validation and access.
//!
//! [`CorpusReader`] implements the loader contract over an in-process byte
//! image: it validates the header (magic, header size, record type sizes,
//! architecture), verifies the whole-image checksum with the stored checksum
//! field treated as zero, and exposes the record graph by interpreting
//! nominal pointers as image offsets (load base zero). Every access is
//! bounds-checked against the image, so a truncated or forged image surfaces
//! as an error rather than a wild read.
//!
//! A real runner performs the same steps against an mmapped corpus file and
//! then relocates in place by adding its base address to every pointer
//! field; [`CorpusReader::pointer_fields`] enumerates exactly those fields.

use crate::checksum::corpus_image_checksum;
use crate::records::{
    ArrayDescriptor, CorpusHeader, CorpusRecord, MemoryBytesData, MemoryBytesRecord,
    MemoryMappingRecord, RegisterStateView, SnapRecord, CORPUS_MAGIC,
};
use snapcorpus_core::arch::ArchitectureId;
use snapcorpus_core::error::{CorpusError, Result};
use std::borrow::Cow;

/// Bounds-checks `[nominal, nominal + len)` against the image and returns the
/// start as a usize offset.
fn check_range(image: &[u8], nominal: u64, len: u64) -> Result<usize> {
    let end = nominal
        .checked_add(len)
        .ok_or(CorpusError::OutOfBounds {
            offset: nominal,
            len,
        })?;
    if end > image.len() as u64 {
        return Err(CorpusError::OutOfBounds {
            offset: nominal,
            len,
        });
    }
    Ok(nominal as usize)
}

fn header_field(field: &'static str, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(CorpusError::HeaderMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

/// A validated view over a corpus image.
#[derive(Debug)]
pub struct CorpusReader<'a> {
    image: &'a [u8],
    corpus: CorpusRecord,
    architecture_id: ArchitectureId,
}

impl<'a> CorpusReader<'a> {
    /// Validates `image` and returns a reader over it.
    ///
    /// Checks, in order: minimum length, magic, header self-description
    /// (header size, total size, record type sizes, architecture), and the
    /// whole-image checksum.
    pub fn new(image: &'a [u8]) -> Result<Self> {
        if image.len() < CorpusRecord::SIZE {
            return Err(CorpusError::Truncated {
                len: image.len(),
                need: CorpusRecord::SIZE,
            });
        }
        let header = CorpusHeader::from_bytes(&image[..CorpusHeader::SIZE]);
        if header.magic != CORPUS_MAGIC {
            return Err(CorpusError::BadMagic {
                actual: header.magic,
            });
        }
        header_field(
            "header_size",
            CorpusHeader::SIZE as u64,
            u64::from(header.header_size),
        )?;
        header_field("num_bytes", image.len() as u64, header.num_bytes)?;
        header_field(
            "corpus_type_size",
            CorpusRecord::SIZE as u64,
            u64::from(header.corpus_type_size),
        )?;
        header_field(
            "snap_type_size",
            SnapRecord::SIZE as u64,
            u64::from(header.snap_type_size),
        )?;
        header_field(
            "register_state_type_size",
            RegisterStateView::SIZE as u64,
            u64::from(header.register_state_type_size),
        )?;
        let architecture_id = ArchitectureId::from_u8(header.architecture_id)
            .filter(|&a| a != ArchitectureId::Undefined)
            .ok_or(CorpusError::HeaderMismatch {
                field: "architecture_id",
                expected: ArchitectureId::X86_64 as u64,
                actual: u64::from(header.architecture_id),
            })?;

        let computed = corpus_image_checksum(image);
        if computed != header.checksum {
            return Err(CorpusError::ChecksumMismatch {
                stored: header.checksum,
                computed,
            });
        }

        let corpus = CorpusRecord::from_bytes(&image[..CorpusRecord::SIZE]);
        if corpus.snaps.size > 0 {
            let total = corpus.snaps.size.checked_mul(8).ok_or(CorpusError::OutOfBounds {
                offset: corpus.snaps.elements,
                len: u64::MAX,
            })?;
            check_range(image, corpus.snaps.elements, total)?;
        }
        Ok(CorpusReader {
            image,
            corpus,
            architecture_id,
        })
    }

    /// The validated header.
    pub fn header(&self) -> &CorpusHeader {
        &self.corpus.header
    }

    /// Architecture of every snap in the corpus.
    pub fn architecture_id(&self) -> ArchitectureId {
        self.architecture_id
    }

    /// Number of snaps.
    pub fn num_snaps(&self) -> u64 {
        self.corpus.snaps.size
    }

    /// Reads the `index`-th snap through the corpus pointer array.
    ///
    /// # Panics
    ///
    /// Panics if `index >= num_snaps()`.
    pub fn snap(&self, index: u64) -> Result<SnapView<'a>> {
        assert!(index < self.num_snaps(), "snap index out of range");
        let pointer_offset = check_range(self.image, self.corpus.snaps.elements + index * 8, 8)?;
        let snap_address = u64::from_le_bytes(
            self.image[pointer_offset..pointer_offset + 8]
                .try_into()
                .unwrap(),
        );
        let offset = check_range(self.image, snap_address, SnapRecord::SIZE as u64)?;
        Ok(SnapView {
            image: self.image,
            record: SnapRecord::from_bytes(&self.image[offset..offset + SnapRecord::SIZE]),
        })
    }

    /// Iterates over all snaps.
    pub fn snaps(&self) -> impl Iterator<Item = Result<SnapView<'a>>> + '_ {
        (0..self.num_snaps()).map(|i| self.snap(i))
    }

    /// Enumerates every pointer field in the image, as (field offset,
    /// nominal value) pairs.
    ///
    /// This is the set a loader rewrites during relocation: the corpus snap
    /// array, the snap pointer elements, and per snap the id pointer, the
    /// array element pointers, the register block pointers, and the stored
    /// payload pointers of its memory-bytes records. Pointers of empty
    /// arrays are never dereferenced and are not included.
    pub fn pointer_fields(&self) -> Result<Vec<(u64, u64)>> {
        let mut fields = Vec::new();
        let push_array = |fields: &mut Vec<(u64, u64)>, at: u64, descriptor: &ArrayDescriptor| {
            if descriptor.size > 0 {
                fields.push((at + 8, descriptor.elements));
            }
        };

        // Corpus record: snaps array at fixed offset.
        push_array(
            &mut fields,
            CorpusHeader::SIZE as u64,
            &self.corpus.snaps,
        );

        for index in 0..self.num_snaps() {
            let element_offset = self.corpus.snaps.elements + index * 8;
            let pointer_offset = check_range(self.image, element_offset, 8)?;
            let snap_address = u64::from_le_bytes(
                self.image[pointer_offset..pointer_offset + 8]
                    .try_into()
                    .unwrap(),
            );
            fields.push((element_offset, snap_address));

            let snap = self.snap(index)?;
            let record = snap.record();
            fields.push((snap_address, record.id));
            push_array(&mut fields, snap_address + 8, &record.memory_mappings);
            fields.push((snap_address + 24, record.registers.fpregs));
            fields.push((snap_address + 32, record.registers.gregs));
            fields.push((snap_address + 48, record.end_state_registers.fpregs));
            fields.push((snap_address + 56, record.end_state_registers.gregs));
            push_array(&mut fields, snap_address + 64, &record.end_state_memory_bytes);

            for (i, mapping) in snap.memory_mappings()?.iter().enumerate() {
                let mapping_address = record.memory_mappings.elements
                    + i as u64 * MemoryMappingRecord::SIZE as u64;
                push_array(&mut fields, mapping_address + 24, &mapping.memory_bytes);
                for (j, memory_bytes) in snap.mapping_memory_bytes(mapping)?.iter().enumerate() {
                    let bytes_address =
                        mapping.memory_bytes.elements + j as u64 * MemoryBytesRecord::SIZE as u64;
                    if let MemoryBytesData::ByteValues { size, elements } = memory_bytes.data {
                        if size > 0 {
                            fields.push((bytes_address + 24, elements));
                        }
                    }
                }
            }
            for (j, memory_bytes) in snap.end_state_memory_bytes()?.iter().enumerate() {
                let bytes_address = record.end_state_memory_bytes.elements
                    + j as u64 * MemoryBytesRecord::SIZE as u64;
                if let MemoryBytesData::ByteValues { size, elements } = memory_bytes.data {
                    if size > 0 {
                        fields.push((bytes_address + 24, elements));
                    }
                }
            }
        }
        Ok(fields)
    }
}

/// A validated view over one Snap record.
#[derive(Debug, Clone, Copy)]
pub struct SnapView<'a> {
    image: &'a [u8],
    record: SnapRecord,
}

impl<'a> SnapView<'a> {
    /// The decoded Snap record.
    pub fn record(&self) -> &SnapRecord {
        &self.record
    }

    /// The snap's id string, read through its nominal pointer.
    pub fn id(&self) -> Result<&'a str> {
        let start = check_range(self.image, self.record.id, 1)?;
        let terminator = self.image[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(CorpusError::MalformedRecord {
                what: "unterminated snap id",
            })?;
        std::str::from_utf8(&self.image[start..start + terminator]).map_err(|_| {
            CorpusError::MalformedRecord {
                what: "snap id is not UTF-8",
            }
        })
    }

    /// The snap's memory mapping records.
    pub fn memory_mappings(&self) -> Result<Vec<MemoryMappingRecord>> {
        read_record_array(
            self.image,
            &self.record.memory_mappings,
            MemoryMappingRecord::SIZE,
            MemoryMappingRecord::from_bytes,
        )
    }

    /// The memory-bytes records backing one of this snap's mappings.
    pub fn mapping_memory_bytes(
        &self,
        mapping: &MemoryMappingRecord,
    ) -> Result<Vec<MemoryBytesRecord>> {
        read_record_array(
            self.image,
            &mapping.memory_bytes,
            MemoryBytesRecord::SIZE,
            MemoryBytesRecord::from_bytes,
        )
    }

    /// The snap's expected end-state memory-bytes records.
    pub fn end_state_memory_bytes(&self) -> Result<Vec<MemoryBytesRecord>> {
        read_record_array(
            self.image,
            &self.record.end_state_memory_bytes,
            MemoryBytesRecord::SIZE,
            MemoryBytesRecord::from_bytes,
        )
    }

    /// The runtime memory content a memory-bytes record decodes to: the
    /// stored payload, or the expansion of a repeating run.
    pub fn memory_bytes_content(&self, record: &MemoryBytesRecord) -> Result<Cow<'a, [u8]>> {
        match record.data {
            MemoryBytesData::ByteValues { size, elements } => {
                let start = check_range(self.image, elements, size)?;
                Ok(Cow::Borrowed(&self.image[start..start + size as usize]))
            }
            MemoryBytesData::ByteRun { value, size } => {
                Ok(Cow::Owned(vec![value; size as usize]))
            }
        }
    }

    /// The raw bytes of a register block of `size` bytes at nominal address
    /// `pointer` (one side of a [`RegisterStateView`]).
    pub fn register_block(&self, pointer: u64, size: usize) -> Result<&'a [u8]> {
        let start = check_range(self.image, pointer, size as u64)?;
        Ok(&self.image[start..start + size])
    }
}

fn read_record_array<T>(
    image: &[u8],
    descriptor: &ArrayDescriptor,
    record_size: usize,
    from_bytes: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>> {
    if descriptor.size == 0 {
        return Ok(Vec::new());
    }
    let total = descriptor
        .size
        .checked_mul(record_size as u64)
        .ok_or(CorpusError::OutOfBounds {
            offset: descriptor.elements,
            len: u64::MAX,
        })?;
    let start = check_range(image, descriptor.elements, total)?;
    Ok(image[start..start + total as usize]
        .chunks_exact(record_size)
        .map(from_bytes)
        .collect())
}
