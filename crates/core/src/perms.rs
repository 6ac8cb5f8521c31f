//! Memory mapping permission bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Permission set for a memory mapping.
///
/// Snapshots may carry richer permission metadata than the runner can apply;
/// the corpus stores only the reduction to the three `mprotect` bits via
/// [`MemoryPerms::to_mprotect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemoryPerms {
    bits: u8,
}

const READ_BIT: u8 = 1;
const WRITE_BIT: u8 = 2;
const EXEC_BIT: u8 = 4;

impl MemoryPerms {
    /// No access.
    pub const NONE: MemoryPerms = MemoryPerms { bits: 0 };
    /// Readable.
    pub const READ: MemoryPerms = MemoryPerms { bits: READ_BIT };
    /// Writable.
    pub const WRITE: MemoryPerms = MemoryPerms { bits: WRITE_BIT };
    /// Executable.
    pub const EXEC: MemoryPerms = MemoryPerms { bits: EXEC_BIT };

    /// Returns true if the mapping is readable.
    pub fn readable(self) -> bool {
        self.bits & READ_BIT != 0
    }

    /// Returns true if the mapping is writable.
    pub fn writable(self) -> bool {
        self.bits & WRITE_BIT != 0
    }

    /// Returns true if the mapping is executable.
    pub fn executable(self) -> bool {
        self.bits & EXEC_BIT != 0
    }

    /// Reduces the permission set to the `mprotect` bit values
    /// (`PROT_READ` = 1, `PROT_WRITE` = 2, `PROT_EXEC` = 4).
    pub fn to_mprotect(self) -> u32 {
        u32::from(self.bits)
    }
}

impl BitOr for MemoryPerms {
    type Output = MemoryPerms;

    fn bitor(self, rhs: MemoryPerms) -> MemoryPerms {
        MemoryPerms {
            bits: self.bits | rhs.bits,
        }
    }
}

impl fmt::Display for MemoryPerms {
    /// `ls -l` style triple, e.g. `r-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.readable() { 'r' } else { '-' },
            if self.writable() { 'w' } else { '-' },
            if self.executable() { 'x' } else { '-' },
        )
    }
}
