//! Relocatable corpus layout and emission
//!
//! This crate implements the two-pass engine that turns a list of
//! [`Snapshot`](snapcorpus_core::Snapshot)s into a single relocatable image:
//! - DataBlock / Ref: growable logical regions and offset handles
//! - Checksum calculators: CRC32 over mapping contents and the whole image
//! - Record shapes: the fixed on-disk layout (header, corpus, snap, mapping,
//!   memory bytes)
//! - Traversal: the two-pass driver with content deduplication
//! - CorpusReader: the consumer-side validator and accessor
//!
//! The emitted image embeds nominal absolute pointers (image loaded at
//! address zero); a loader relocates it by adding its base address to every
//! pointer field.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod checksum;
pub mod reader;
pub mod records;
pub mod traversal;

pub use block::{DataBlock, Ref};
pub use checksum::{
    corpus_image_checksum, CorpusChecksumCalculator, MemoryChecksumCalculator,
};
pub use reader::{CorpusReader, SnapView};
pub use records::{
    ArrayDescriptor, CorpusHeader, CorpusRecord, MemoryBytesData, MemoryBytesRecord,
    MemoryMappingRecord, RegisterStateView, SnapRecord, CORPUS_MAGIC, RECORD_ALIGNMENT,
};
pub use traversal::{generate_relocatable_corpus, CorpusOptions, RelocatableCorpus};
