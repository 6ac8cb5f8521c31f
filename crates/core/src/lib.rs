//! Core types for snapcorpus
//!
//! This crate defines the foundational types consumed by the corpus
//! generator:
//! - ArchitectureId / Arch: target architecture dispatch and register sizes
//! - Snapshot: the input data model (mappings, memory bytes, registers,
//!   expected end state)
//! - MemoryPerms: mapping permission bits with `mprotect` reduction
//! - RegisterChecksum: the serialized end-state register checksum record
//! - Page and byte-run helpers used by the layout engine
//! - CorpusError: the unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arch;
pub mod byte_run;
pub mod error;
pub mod page;
pub mod perms;
pub mod reg_checksum;
pub mod snapshot;

pub use arch::{AArch64, Arch, ArchitectureId, X86_64};
pub use byte_run::is_repeating_byte_run;
pub use error::{CorpusError, Result};
pub use page::{is_page_aligned, round_up, PAGE_SIZE};
pub use perms::MemoryPerms;
pub use reg_checksum::RegisterChecksum;
pub use snapshot::{
    split_bytes_by_mapping, EndState, MemoryBytes, MemoryMapping, RegisterState, Snapshot,
};
