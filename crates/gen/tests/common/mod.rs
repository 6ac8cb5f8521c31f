//! Shared fixtures for corpus integration tests.
#![allow(dead_code)] // not every test binary uses every fixture

use snapcorpus_core::arch::{AArch64, Arch, X86_64};
use snapcorpus_core::reg_checksum::RegisterChecksum;
use snapcorpus_core::snapshot::{EndState, MemoryBytes, MemoryMapping, RegisterState, Snapshot};
use snapcorpus_core::{ArchitectureId, MemoryPerms};

/// Start of the code mapping used by the fixtures (page-aligned).
pub const CODE_START: u64 = 0x1000;

/// End-state instruction address used by the fixtures.
pub const END_ADDRESS: u64 = 0x1040;

/// A full x86_64 register state with recognizable filler.
pub fn x86_registers(fill: u8) -> RegisterState {
    RegisterState::new(
        vec![fill; X86_64::GREGS_SIZE],
        vec![fill.wrapping_add(1); X86_64::FPREGS_SIZE],
    )
}

/// A full aarch64 register state with recognizable filler.
pub fn aarch64_registers(fill: u8) -> RegisterState {
    RegisterState::new(
        vec![fill; AArch64::GREGS_SIZE],
        vec![fill.wrapping_add(1); AArch64::FPREGS_SIZE],
    )
}

/// The register checksum blob carried by the fixtures.
pub fn register_checksum_blob() -> Vec<u8> {
    RegisterChecksum {
        register_groups: 0b101,
        checksum: 0x1234_5678,
    }
    .serialize()
    .to_vec()
}

/// One canonical x86_64 snapshot: a read-execute code mapping at
/// [`CODE_START`] backed by `payload`, filled registers, and one end state
/// reusing the entry registers.
pub fn x86_snapshot(id: &str, payload: Vec<u8>) -> Snapshot {
    let mapping_bytes = payload.len().next_multiple_of(4096).max(4096) as u64;
    let mut snapshot = Snapshot::new(id, ArchitectureId::X86_64);
    snapshot.add_memory_mapping(MemoryMapping::new(
        CODE_START,
        mapping_bytes,
        MemoryPerms::READ | MemoryPerms::EXEC,
    ));
    snapshot.add_memory_bytes(MemoryBytes::new(CODE_START, payload));
    snapshot.set_registers(x86_registers(0xAB));

    let mut end_state = EndState::new(END_ADDRESS, x86_registers(0xAB));
    end_state.set_register_checksum(register_checksum_blob());
    snapshot.add_end_state(end_state);
    snapshot
}

/// Like [`x86_snapshot`] but for aarch64.
pub fn aarch64_snapshot(id: &str, payload: Vec<u8>) -> Snapshot {
    let mapping_bytes = payload.len().next_multiple_of(4096).max(4096) as u64;
    let mut snapshot = Snapshot::new(id, ArchitectureId::AArch64);
    snapshot.add_memory_mapping(MemoryMapping::new(
        CODE_START,
        mapping_bytes,
        MemoryPerms::READ | MemoryPerms::EXEC,
    ));
    snapshot.add_memory_bytes(MemoryBytes::new(CODE_START, payload));
    snapshot.set_registers(aarch64_registers(0xAB));

    let mut end_state = EndState::new(END_ADDRESS, aarch64_registers(0xAB));
    end_state.set_register_checksum(register_checksum_blob());
    snapshot.add_end_state(end_state);
    snapshot
}

/// A small payload that is neither page-sized nor a repeating run.
pub fn small_code_payload() -> Vec<u8> {
    (0..64u8).collect()
}
