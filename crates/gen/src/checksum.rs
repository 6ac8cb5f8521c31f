//! Streaming checksums over corpus contents.
//!
//! Two checksums protect a corpus: a per-mapping checksum over that mapping's
//! memory payloads, and a whole-image checksum stored in the header. The
//! runner recomputes both with the same function, so the algorithm (CRC32)
//! is part of the layout contract.
//!
//! The image checksum covers the header's own checksum field *as zero*, which
//! lets the generator store the value without invalidating it.

use crate::records::CorpusHeader;
use crc32fast::Hasher;

/// Streaming checksum over a memory mapping's payload bytes.
#[derive(Debug, Default)]
pub struct MemoryChecksumCalculator {
    hasher: Hasher,
}

impl MemoryChecksumCalculator {
    /// Creates a fresh accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `data` into the checksum.
    pub fn add_data(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Checksum of everything fed so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// Streaming checksum over a whole corpus image.
#[derive(Debug, Default)]
pub struct CorpusChecksumCalculator {
    hasher: Hasher,
}

impl CorpusChecksumCalculator {
    /// Creates a fresh accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `data` into the checksum.
    pub fn add_data(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Checksum of everything fed so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// Computes the corpus checksum of a complete image, treating the header's
/// checksum field as zero.
///
/// This is the verification-side counterpart of the value the generator
/// stores: for an intact image the result equals the stored field.
pub fn corpus_image_checksum(image: &[u8]) -> u32 {
    let field = CorpusHeader::CHECKSUM_OFFSET;
    let mut calculator = CorpusChecksumCalculator::new();
    if image.len() <= field {
        calculator.add_data(image);
        return calculator.checksum();
    }
    calculator.add_data(&image[..field]);
    calculator.add_data(&[0u8; 4]);
    calculator.add_data(&image[(field + 4).min(image.len())..]);
    calculator.checksum()
}
