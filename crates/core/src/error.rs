//! Error types for corpus generation and validation
//!
//! `CorpusError` is the unified error type for both sides of the layout
//! contract: the generator reports caller-contract violations (wrong
//! architecture, malformed register data, more than one end state), and the
//! reader reports image validation failures (bad magic, type-size mismatch,
//! checksum mismatch).
//!
//! Conditions a caller cannot cause (capacity overrun on a correctly sized
//! image buffer, dereferencing a ref before its block has a base) are
//! programmer errors and panic instead of surfacing here.

use crate::arch::ArchitectureId;
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Unified error type for corpus generation and consumption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorpusError {
    /// The entry point was asked to build a corpus for the undefined
    /// architecture id.
    #[error("cannot generate a corpus for the undefined architecture")]
    UndefinedArchitecture,

    /// A snapshot's architecture does not match the corpus architecture.
    #[error("snapshot `{id}`: architecture {actual} does not match corpus architecture {expected}")]
    ArchitectureMismatch {
        /// Offending snapshot id
        id: String,
        /// Architecture the corpus is being built for
        expected: ArchitectureId,
        /// Architecture recorded in the snapshot
        actual: ArchitectureId,
    },

    /// A snapshot does not have exactly one expected end state.
    ///
    /// Inputs must arrive canonicalized; anything else is a caller bug.
    #[error("snapshot `{id}`: expected exactly one end state, found {count}")]
    UnexpectedEndStateCount {
        /// Offending snapshot id
        id: String,
        /// Number of end states found
        count: usize,
    },

    /// A serialized register block has the wrong size for its architecture.
    ///
    /// Empty register data is only permitted for end-state registers.
    #[error(
        "snapshot `{id}`: {kind} register data has {actual} bytes, expected {expected}"
    )]
    BadRegisterData {
        /// Offending snapshot id
        id: String,
        /// Register set kind ("greg" or "fpreg")
        kind: &'static str,
        /// Size the architecture requires
        expected: usize,
        /// Size found in the snapshot
        actual: usize,
    },

    /// The end-state register checksum blob could not be decoded.
    #[error(
        "snapshot `{id}`: register checksum blob has {len} bytes, expected 0 or {expected}"
    )]
    BadRegisterChecksum {
        /// Offending snapshot id
        id: String,
        /// Size found in the snapshot
        len: usize,
        /// Size of a serialized register checksum
        expected: usize,
    },

    /// A memory-bytes payload is not contained in any memory mapping.
    #[error(
        "snapshot `{id}`: memory bytes [{start:#x}, {start:#x}+{len}) not covered by any mapping"
    )]
    UnmappedMemoryBytes {
        /// Offending snapshot id
        id: String,
        /// Start address of the uncovered payload
        start: u64,
        /// Length of the uncovered payload
        len: u64,
    },

    /// The laid-out corpus requires an alignment larger than the page size,
    /// so a runner could not mmap it.
    #[error("corpus requires alignment {alignment}, larger than page size {page_size}")]
    AlignmentTooLarge {
        /// Required alignment of the main block
        alignment: u64,
        /// Runner page size
        page_size: u64,
    },

    /// The image is too small to hold a corpus record.
    #[error("corpus image truncated: {len} bytes, need at least {need}")]
    Truncated {
        /// Image length
        len: usize,
        /// Minimum length required
        need: usize,
    },

    /// The image does not start with the corpus magic.
    #[error("bad corpus magic: {actual:#018x}")]
    BadMagic {
        /// Magic value found in the image
        actual: u64,
    },

    /// A self-describing header field disagrees with this implementation.
    #[error("corpus header field `{field}` mismatch: expected {expected}, got {actual}")]
    HeaderMismatch {
        /// Header field name
        field: &'static str,
        /// Value this implementation requires
        expected: u64,
        /// Value stored in the image
        actual: u64,
    },

    /// The stored corpus checksum does not match the recomputed one.
    #[error("corpus checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        stored: u32,
        /// Checksum recomputed over the image
        computed: u32,
    },

    /// A nominal pointer or array descriptor references bytes outside the
    /// image.
    #[error("corpus record at offset {offset:#x} (+{len} bytes) is out of bounds")]
    OutOfBounds {
        /// Nominal offset of the out-of-range access
        offset: u64,
        /// Length of the attempted access
        len: u64,
    },

    /// A record inside the image is structurally invalid.
    #[error("malformed corpus record: {what}")]
    MalformedRecord {
        /// Description of the malformed field
        what: &'static str,
    },
}
