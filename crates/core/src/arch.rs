//! Target architectures and their register-block geometry
//!
//! The corpus layout is identical across architectures; only the sizes of the
//! two register blocks differ. Register contents are opaque to the generator:
//! a serialized register set is accepted when it is exactly the in-image size
//! for its architecture and is copied verbatim into the image. Both supported
//! architectures are 64-bit, so pointer fields in the image are always
//! `u64`-wide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Architecture identifier stored in the corpus header.
///
/// The numeric values are part of the on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArchitectureId {
    /// No architecture; never valid in a corpus.
    Undefined = 0,
    /// x86_64 (AMD64)
    X86_64 = 1,
    /// aarch64 (ARM64)
    AArch64 = 2,
}

impl ArchitectureId {
    /// Decode an architecture id from its header byte.
    pub fn from_u8(value: u8) -> Option<ArchitectureId> {
        match value {
            0 => Some(ArchitectureId::Undefined),
            1 => Some(ArchitectureId::X86_64),
            2 => Some(ArchitectureId::AArch64),
            _ => None,
        }
    }

    /// Canonical lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            ArchitectureId::Undefined => "undefined",
            ArchitectureId::X86_64 => "x86_64",
            ArchitectureId::AArch64 => "aarch64",
        }
    }
}

impl fmt::Display for ArchitectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::X86_64 {}
    impl Sealed for super::AArch64 {}
}

/// A supported target architecture.
///
/// Implementations are zero-sized dispatch tags; the trait carries the
/// per-architecture constants the layout engine needs. Sealed: the corpus
/// format enumerates its architectures in [`ArchitectureId`].
pub trait Arch: private::Sealed + 'static {
    /// Identifier recorded in the corpus header.
    const ID: ArchitectureId;

    /// Size in bytes of the general-purpose register block.
    const GREGS_SIZE: usize;

    /// Size in bytes of the floating-point register block.
    const FPREGS_SIZE: usize;
}

/// x86_64 dispatch tag.
///
/// The general-purpose block covers the 16 integer registers, rip, eflags,
/// the segment registers and the fs/gs bases; the floating-point block is
/// the 512-byte FXSAVE area.
#[derive(Debug)]
pub enum X86_64 {}

impl Arch for X86_64 {
    const ID: ArchitectureId = ArchitectureId::X86_64;
    const GREGS_SIZE: usize = 216;
    const FPREGS_SIZE: usize = 512;
}

/// aarch64 dispatch tag.
///
/// The general-purpose block covers x0-x30, sp, pc, pstate and the thread
/// pointer registers; the floating-point block covers v0-v31 plus fpsr and
/// fpcr.
#[derive(Debug)]
pub enum AArch64 {}

impl Arch for AArch64 {
    const ID: ArchitectureId = ArchitectureId::AArch64;
    const GREGS_SIZE: usize = 288;
    const FPREGS_SIZE: usize = 528;
}
