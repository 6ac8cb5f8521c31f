//! # snapcorpus
//!
//! Builds *relocatable corpus* images out of CPU snapshots. A corpus is a
//! single flat byte image that a runner process can mmap and use in place:
//! every internal cross-reference is stored as a native pointer valued as if
//! the image were loaded at address zero, so relocation is one pass of adding
//! the actual load base to each pointer field.
//!
//! # Quick Start
//!
//! ```no_run
//! use snapcorpus::{
//!     generate_relocatable_corpus, ArchitectureId, CorpusOptions, CorpusReader, Snapshot,
//! };
//!
//! fn main() -> snapcorpus::Result<()> {
//!     let snapshots: Vec<Snapshot> = load_snapshots();
//!     let corpus = generate_relocatable_corpus(
//!         ArchitectureId::X86_64,
//!         &snapshots,
//!         &CorpusOptions::default(),
//!     )?;
//!
//!     // The image is ready to be written out and mmapped by a runner.
//!     std::fs::write("corpus.img", &corpus.image).unwrap();
//!
//!     // Consumer side: validate header, type sizes and checksum.
//!     let reader = CorpusReader::new(&corpus.image)?;
//!     assert_eq!(reader.num_snaps(), snapshots.len() as u64);
//!     Ok(())
//! }
//! # fn load_snapshots() -> Vec<snapcorpus::Snapshot> { Vec::new() }
//! ```
//!
//! # Architecture
//!
//! Generation is a deterministic two-pass walk over the input snapshots: a
//! layout pass computes sizes and offsets of every record, then an emission
//! pass re-runs the identical walk and writes record contents into a buffer
//! sized by the first pass. Repeated byte payloads and serialized register
//! sets are stored once; pointer-bearing records are clustered apart from
//! pointer-free data so that relocation dirties as few pages as possible.
//!
//! Internal crates (`snapcorpus-core`, `snapcorpus-gen`) are implementation
//! detail; only the surface re-exported here is stable.

// Re-export the public API from the member crates.
pub use snapcorpus_core::{
    arch::{Arch, ArchitectureId, AArch64, X86_64},
    error::{CorpusError, Result},
    perms::MemoryPerms,
    snapshot::{EndState, MemoryBytes, MemoryMapping, RegisterState, Snapshot},
};
pub use snapcorpus_gen::{
    generate_relocatable_corpus, CorpusOptions, CorpusReader, RelocatableCorpus,
};
