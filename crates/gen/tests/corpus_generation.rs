//! End-to-end corpus generation tests: layout, deduplication, counters and
//! caller-contract errors.

mod common;

use common::*;
use snapcorpus_core::arch::{AArch64, Arch, X86_64};
use snapcorpus_core::snapshot::{EndState, MemoryBytes, MemoryMapping, RegisterState, Snapshot};
use snapcorpus_core::{ArchitectureId, CorpusError, MemoryPerms, PAGE_SIZE};
use snapcorpus_gen::{
    generate_relocatable_corpus, CorpusOptions, CorpusReader, CorpusRecord, MemoryBytesData,
    MemoryChecksumCalculator, RegisterStateView, SnapRecord,
};

fn options(compress_repeating_bytes: bool) -> CorpusOptions {
    CorpusOptions {
        compress_repeating_bytes,
    }
}

#[test]
fn test_empty_corpus() {
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &[], &CorpusOptions::default())
            .unwrap();

    // Nothing but the corpus record itself.
    assert_eq!(corpus.image.len(), CorpusRecord::SIZE);
    assert_eq!(corpus.block_sizes["main_block"], CorpusRecord::SIZE as u64);

    let reader = CorpusReader::new(&corpus.image).unwrap();
    assert_eq!(reader.num_snaps(), 0);
    assert_eq!(reader.architecture_id(), ArchitectureId::X86_64);
}

#[test]
fn test_single_snapshot_page_payload_stored_page_aligned() {
    let snapshots = vec![x86_snapshot("snap-page", vec![0u8; PAGE_SIZE as usize])];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(false)).unwrap();

    // The page-aligned page-sized payload lands in the page-data block,
    // page-aligned within the image so it could be mmapped directly.
    assert_eq!(corpus.block_sizes["page_data_block"], PAGE_SIZE);
    assert_eq!(corpus.block_sizes["byte_data_block"], 0);

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let mappings = snap.memory_mappings().unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].start_address, CODE_START);
    assert_eq!(mappings[0].num_bytes, PAGE_SIZE);
    assert_eq!(mappings[0].perms, 5); // PROT_READ | PROT_EXEC

    let bytes_records = snap.mapping_memory_bytes(&mappings[0]).unwrap();
    assert_eq!(bytes_records.len(), 1);
    match bytes_records[0].data {
        MemoryBytesData::ByteValues { size, elements } => {
            assert_eq!(size, PAGE_SIZE);
            assert_eq!(elements % PAGE_SIZE, 0, "payload not page-aligned");
        }
        MemoryBytesData::ByteRun { .. } => panic!("compression is off"),
    }
    let content = snap.memory_bytes_content(&bytes_records[0]).unwrap();
    assert_eq!(&content[..], &vec![0u8; PAGE_SIZE as usize][..]);
}

#[test]
fn test_single_snapshot_repeating_run() {
    let snapshots = vec![x86_snapshot("snap-page", vec![0u8; PAGE_SIZE as usize])];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    // The constant page is encoded as (value, size); no payload is stored.
    assert_eq!(corpus.block_sizes["page_data_block"], 0);
    assert_eq!(corpus.block_sizes["byte_data_block"], 0);

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let mappings = snap.memory_mappings().unwrap();
    let bytes_records = snap.mapping_memory_bytes(&mappings[0]).unwrap();
    assert_eq!(
        bytes_records[0].data,
        MemoryBytesData::ByteRun {
            value: 0,
            size: PAGE_SIZE
        }
    );
}

#[test]
fn test_payload_dedup_across_snapshots() {
    let payload = small_code_payload();
    let snapshots = vec![
        x86_snapshot("snap-a", payload.clone()),
        x86_snapshot("snap-b", payload.clone()),
    ];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    // One stored copy.
    assert_eq!(corpus.block_sizes["byte_data_block"], payload.len() as u64);

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let mut element_pointers = Vec::new();
    for snap in reader.snaps() {
        let snap = snap.unwrap();
        let mappings = snap.memory_mappings().unwrap();
        let bytes_records = snap.mapping_memory_bytes(&mappings[0]).unwrap();
        match bytes_records[0].data {
            MemoryBytesData::ByteValues { elements, .. } => element_pointers.push(elements),
            MemoryBytesData::ByteRun { .. } => panic!("payload is not a run"),
        }
    }
    assert_eq!(element_pointers.len(), 2);
    assert_eq!(
        element_pointers[0], element_pointers[1],
        "equal payloads must share one stored copy"
    );
}

#[test]
fn test_register_dedup_across_snapshots() {
    let snapshots = vec![
        x86_snapshot("snap-a", small_code_payload()),
        x86_snapshot("snap-b", vec![0x90u8; 48]),
    ];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    // Entry and end-state registers are identical everywhere, so each
    // register kind is stored exactly once.
    assert_eq!(
        corpus.block_sizes["gregs_block"],
        X86_64::GREGS_SIZE as u64
    );
    assert_eq!(
        corpus.block_sizes["fpregs_block"],
        X86_64::FPREGS_SIZE as u64
    );

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let views: Vec<RegisterStateView> = reader
        .snaps()
        .map(|snap| {
            let snap = snap.unwrap();
            assert_eq!(snap.record().registers, snap.record().end_state_registers);
            snap.record().registers
        })
        .collect();
    assert_eq!(views[0], views[1], "register views must share one block");
}

#[test]
fn test_register_blocks_hold_serialized_contents() {
    let snapshots = vec![x86_snapshot("snap-regs", small_code_payload())];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let view = snap.record().registers;

    let gregs = snap.register_block(view.gregs, X86_64::GREGS_SIZE).unwrap();
    let fpregs = snap
        .register_block(view.fpregs, X86_64::FPREGS_SIZE)
        .unwrap();
    assert_eq!(gregs, &vec![0xAB; X86_64::GREGS_SIZE][..]);
    assert_eq!(fpregs, &vec![0xAC; X86_64::FPREGS_SIZE][..]);

    // The register-memory checksum covers the blocks as stored.
    let mut checksum = MemoryChecksumCalculator::new();
    checksum.add_data(fpregs);
    checksum.add_data(gregs);
    assert_eq!(snap.record().registers_memory_checksum, checksum.checksum());
}

#[test]
fn test_empty_end_state_registers_stored_as_zeros() {
    let mut snapshot = x86_snapshot("snap-undef", small_code_payload());
    // Replace the end state with one whose registers are undefined.
    let mut replacement = Snapshot::new("snap-undef", ArchitectureId::X86_64);
    for mapping in snapshot.memory_mappings() {
        replacement.add_memory_mapping(mapping.clone());
    }
    for bytes in snapshot.memory_bytes() {
        replacement.add_memory_bytes(bytes.clone());
    }
    replacement.set_registers(snapshot.registers().clone());
    replacement.add_end_state(EndState::new(END_ADDRESS, RegisterState::default()));
    snapshot = replacement;

    let corpus = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap();

    // Entry and end-state registers differ, so both copies exist.
    assert_eq!(
        corpus.block_sizes["gregs_block"],
        2 * X86_64::GREGS_SIZE as u64
    );

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let end_view = snap.record().end_state_registers;
    let gregs = snap
        .register_block(end_view.gregs, X86_64::GREGS_SIZE)
        .unwrap();
    let fpregs = snap
        .register_block(end_view.fpregs, X86_64::FPREGS_SIZE)
        .unwrap();
    assert!(gregs.iter().all(|&b| b == 0));
    assert!(fpregs.iter().all(|&b| b == 0));
}

#[test]
fn test_mapping_memory_checksum() {
    let payload = small_code_payload();
    let snapshots = vec![x86_snapshot("snap-checksum", payload.clone())];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let mappings = snap.memory_mappings().unwrap();

    let mut checksum = MemoryChecksumCalculator::new();
    checksum.add_data(&payload);
    assert_eq!(mappings[0].memory_checksum, checksum.checksum());
}

#[test]
fn test_determinism() {
    let snapshots = vec![
        x86_snapshot("snap-a", small_code_payload()),
        x86_snapshot("snap-b", vec![0u8; PAGE_SIZE as usize]),
        x86_snapshot("snap-c", vec![0xCC; 512]),
    ];
    let first =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();
    let second =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();
    assert_eq!(first.image, second.image);
    assert_eq!(first.block_sizes, second.block_sizes);
}

#[test]
fn test_header_self_description() {
    let snapshots = vec![x86_snapshot("snap-header", small_code_payload())];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let header = reader.header();
    assert_eq!(header.num_bytes, corpus.image.len() as u64);
    assert_eq!(header.corpus_type_size, CorpusRecord::SIZE as u32);
    assert_eq!(header.snap_type_size, SnapRecord::SIZE as u32);
    assert_eq!(
        header.register_state_type_size,
        RegisterStateView::SIZE as u32
    );
    assert_eq!(header.architecture_id, ArchitectureId::X86_64 as u8);
}

#[test]
fn test_snap_ids_roundtrip() {
    let snapshots = vec![
        x86_snapshot("first-snap", small_code_payload()),
        x86_snapshot("second-snap", vec![0x90u8; 32]),
    ];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    assert_eq!(reader.snap(0).unwrap().id().unwrap(), "first-snap");
    assert_eq!(reader.snap(1).unwrap().id().unwrap(), "second-snap");
}

#[test]
fn test_pointer_bearing_blocks_precede_pointer_free_data() {
    let snapshots = vec![x86_snapshot("snap-order", small_code_payload())];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let record = snap.record();
    let mappings = snap.memory_mappings().unwrap();

    // MemoryBytes records (pointer-bearing) come before MemoryMapping
    // records, which come before the pointer-free tail (ids, registers).
    assert!(mappings[0].memory_bytes.elements < record.memory_mappings.elements);
    assert!(record.memory_mappings.elements < record.id);
    assert!(record.id < record.registers.fpregs);
    assert!(record.registers.fpregs < record.registers.gregs);
}

#[test]
fn test_aarch64_corpus() {
    let snapshots = vec![aarch64_snapshot("snap-arm", small_code_payload())];
    let corpus =
        generate_relocatable_corpus(ArchitectureId::AArch64, &snapshots, &options(true)).unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    assert_eq!(reader.architecture_id(), ArchitectureId::AArch64);
    assert_eq!(
        corpus.block_sizes["gregs_block"],
        AArch64::GREGS_SIZE as u64
    );
    assert_eq!(
        corpus.block_sizes["fpregs_block"],
        AArch64::FPREGS_SIZE as u64
    );
}

// ============================================================================
// Caller-contract errors
// ============================================================================

#[test]
fn test_architecture_mismatch_names_snapshot() {
    let snapshots = vec![aarch64_snapshot("snap-wrong-arch", small_code_payload())];
    let err = generate_relocatable_corpus(ArchitectureId::X86_64, &snapshots, &options(true))
        .unwrap_err();
    match err {
        CorpusError::ArchitectureMismatch {
            id,
            expected,
            actual,
        } => {
            assert_eq!(id, "snap-wrong-arch");
            assert_eq!(expected, ArchitectureId::X86_64);
            assert_eq!(actual, ArchitectureId::AArch64);
        }
        other => panic!("expected ArchitectureMismatch, got {other:?}"),
    }
}

#[test]
fn test_missing_end_state_rejected() {
    let mut snapshot = Snapshot::new("snap-no-end", ArchitectureId::X86_64);
    snapshot.set_registers(x86_registers(0xAB));
    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CorpusError::UnexpectedEndStateCount { count: 0, .. }
    ));
}

#[test]
fn test_two_end_states_rejected() {
    let mut snapshot = x86_snapshot("snap-two-ends", small_code_payload());
    snapshot.add_end_state(EndState::new(0x2000, RegisterState::default()));
    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CorpusError::UnexpectedEndStateCount { count: 2, .. }
    ));
}

#[test]
fn test_empty_entry_registers_rejected() {
    let mut snapshot = x86_snapshot("snap-no-regs", small_code_payload());
    snapshot.set_registers(RegisterState::default());
    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    match err {
        CorpusError::BadRegisterData {
            id, kind, actual, ..
        } => {
            assert_eq!(id, "snap-no-regs");
            assert_eq!(kind, "greg");
            assert_eq!(actual, 0);
        }
        other => panic!("expected BadRegisterData, got {other:?}"),
    }
}

#[test]
fn test_wrong_size_registers_rejected() {
    let mut snapshot = x86_snapshot("snap-short-regs", small_code_payload());
    snapshot.set_registers(RegisterState::new(
        vec![0u8; 10],
        vec![0u8; X86_64::FPREGS_SIZE],
    ));
    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CorpusError::BadRegisterData {
            kind: "greg",
            expected,
            actual: 10,
            ..
        } if expected == X86_64::GREGS_SIZE
    ));
}

#[test]
fn test_bad_register_checksum_blob_rejected() {
    let mut snapshot = x86_snapshot("snap-bad-checksum", small_code_payload());
    let mut end_state = EndState::new(END_ADDRESS, x86_registers(0xAB));
    end_state.set_register_checksum(vec![1, 2, 3]);
    let mut replacement = Snapshot::new("snap-bad-checksum", ArchitectureId::X86_64);
    for mapping in snapshot.memory_mappings() {
        replacement.add_memory_mapping(mapping.clone());
    }
    for bytes in snapshot.memory_bytes() {
        replacement.add_memory_bytes(bytes.clone());
    }
    replacement.set_registers(snapshot.registers().clone());
    replacement.add_end_state(end_state);
    snapshot = replacement;

    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CorpusError::BadRegisterChecksum { len: 3, .. }
    ));
}

#[test]
fn test_unmapped_memory_bytes_rejected() {
    let mut snapshot = x86_snapshot("snap-unmapped", small_code_payload());
    snapshot.add_memory_bytes(MemoryBytes::new(0xDEAD_0000, vec![1, 2, 3]));
    let err = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CorpusError::UnmappedMemoryBytes {
            start: 0xDEAD_0000,
            ..
        }
    ));
}

#[test]
fn test_mapping_with_multiple_payloads() {
    let mut snapshot = Snapshot::new("snap-multi", ArchitectureId::X86_64);
    snapshot.add_memory_mapping(MemoryMapping::new(
        CODE_START,
        2 * PAGE_SIZE,
        MemoryPerms::READ | MemoryPerms::WRITE,
    ));
    snapshot.add_memory_bytes(MemoryBytes::new(CODE_START, small_code_payload()));
    snapshot.add_memory_bytes(MemoryBytes::new(CODE_START + PAGE_SIZE, vec![0x77; 128]));
    snapshot.set_registers(x86_registers(0x11));
    snapshot.add_end_state(EndState::new(END_ADDRESS, x86_registers(0x11)));

    let corpus = generate_relocatable_corpus(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        &options(true),
    )
    .unwrap();

    let reader = CorpusReader::new(&corpus.image).unwrap();
    let snap = reader.snap(0).unwrap();
    let mappings = snap.memory_mappings().unwrap();
    let bytes_records = snap.mapping_memory_bytes(&mappings[0]).unwrap();
    assert_eq!(bytes_records.len(), 2);
    assert_eq!(bytes_records[0].start_address, CODE_START);
    assert_eq!(bytes_records[1].start_address, CODE_START + PAGE_SIZE);

    // The mapping checksum covers both payloads in stored order.
    let mut checksum = MemoryChecksumCalculator::new();
    checksum.add_data(&small_code_payload());
    checksum.add_data(&[0x77; 128]);
    assert_eq!(mappings[0].memory_checksum, checksum.checksum());
}
