//! Two-pass corpus layout and emission.
//!
//! Generation walks the snapshot list twice with identical logic. The layout
//! pass only allocates refs, accumulating the size and alignment of every
//! sub-block. The image buffer is then allocated and [`Traversal::prepare`]
//! composes the sub-blocks into the main block, giving each its place in the
//! image and its load address. The emission pass re-runs the same walk and
//! this time writes record contents through the refs; allocation is
//! deterministic, so every ref lands on the same offset as in the first pass.
//!
//! Sub-blocks are composed in a fixed order that clusters pointer-bearing
//! records (snap block, memory-bytes block) ahead of pointer-free data.
//! Relocation only dirties pages holding pointer fields, so the pointer-free
//! tail stays copy-on-write-shared between runner processes that mmap the
//! same corpus.
//!
//! Byte payloads and serialized register sets are deduplicated by content.
//! Register sets use separate blocks and tables per register kind: two
//! differently typed register sets could serialize to the same bytes and must
//! not alias.

use crate::block::{DataBlock, Ref};
use crate::checksum::{CorpusChecksumCalculator, MemoryChecksumCalculator};
use crate::records::{
    ArrayDescriptor, CorpusHeader, CorpusRecord, MemoryBytesData, MemoryBytesRecord,
    MemoryMappingRecord, RegisterStateView, SnapRecord, CORPUS_MAGIC, RECORD_ALIGNMENT,
};
use snapcorpus_core::arch::{AArch64, Arch, ArchitectureId, X86_64};
use snapcorpus_core::error::{CorpusError, Result};
use snapcorpus_core::reg_checksum::{RegisterChecksum, REGISTER_CHECKSUM_BYTES};
use snapcorpus_core::snapshot::{
    split_bytes_by_mapping, MemoryBytes, MemoryMapping, RegisterState, Snapshot,
};
use snapcorpus_core::{is_page_aligned, is_repeating_byte_run, PAGE_SIZE};
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Corpora are emitted as if loaded at address zero; the loader's relocation
/// step adds its real base to every pointer field.
const NOMINAL_LOAD_ADDRESS: u64 = 0;

/// Options controlling corpus generation.
#[derive(Debug, Clone, Copy)]
pub struct CorpusOptions {
    /// Store single-byte-value payloads as (value, size) pairs instead of
    /// byte arrays. On by default; constant-filled pages dominate most
    /// snapshot sets.
    pub compress_repeating_bytes: bool,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        CorpusOptions {
            compress_repeating_bytes: true,
        }
    }
}

/// A generated corpus: the image plus per-block size counters.
#[derive(Debug)]
pub struct RelocatableCorpus {
    /// The emitted image, ready to be written out and mmapped by a runner.
    pub image: Vec<u8>,
    /// Sizes of the internal blocks, keyed `main_block`, `snap_block`,
    /// `memory_bytes_block`, `memory_mapping_block`, `byte_data_block`,
    /// `string_block`, `fpregs_block`, `gregs_block`, `page_data_block`.
    /// Intended for debugging and size accounting.
    pub block_sizes: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Layout,
    Emit,
}

#[derive(Debug, Clone, Copy)]
enum RegisterKind {
    Greg,
    Fpreg,
}

impl RegisterKind {
    fn name(self) -> &'static str {
        match self {
            RegisterKind::Greg => "greg",
            RegisterKind::Fpreg => "fpreg",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RegisterStateRefs {
    fpregs: Ref,
    gregs: Ref,
}

impl RegisterStateRefs {
    fn view(&self) -> RegisterStateView {
        RegisterStateView {
            fpregs: self.fpregs.load_address(),
            gregs: self.gregs.load_address(),
        }
    }
}

/// The two-pass build state for one corpus.
///
/// Not safe for concurrent use; a build runs the layout pass, `prepare`, then
/// the emission pass, strictly in that order. Snapshot storage is borrowed
/// for the whole build: dedup tables key on payload bytes owned by the
/// snapshots.
struct Traversal<'a, A: Arch> {
    options: CorpusOptions,

    // The main block covers the whole corpus; the others are composed into
    // it by `prepare` in the order they are declared here.
    main_block: DataBlock,
    snap_block: DataBlock,
    memory_bytes_block: DataBlock,
    memory_mapping_block: DataBlock,
    byte_data_block: DataBlock,
    string_block: DataBlock,
    fpregs_block: DataBlock,
    gregs_block: DataBlock,
    page_data_block: DataBlock,

    byte_data_refs: HashMap<&'a [u8], Ref>,
    fpregs_refs: HashMap<&'a [u8], Ref>,
    gregs_refs: HashMap<&'a [u8], Ref>,

    /// Backing buffer for the image; empty until `prepare`.
    image: Vec<u8>,

    _arch: PhantomData<A>,
}

impl<'a, A: Arch> Traversal<'a, A> {
    fn new(options: CorpusOptions) -> Self {
        Traversal {
            options,
            main_block: DataBlock::new(),
            snap_block: DataBlock::new(),
            memory_bytes_block: DataBlock::new(),
            memory_mapping_block: DataBlock::new(),
            byte_data_block: DataBlock::new(),
            string_block: DataBlock::new(),
            fpregs_block: DataBlock::new(),
            gregs_block: DataBlock::new(),
            page_data_block: DataBlock::new(),
            byte_data_refs: HashMap::new(),
            fpregs_refs: HashMap::new(),
            gregs_refs: HashMap::new(),
            image: Vec::new(),
            _arch: PhantomData,
        }
    }

    /// Stores a deduplicated memory payload and returns its ref.
    ///
    /// Payloads that are page-aligned in start address and page-sized in
    /// length go to the page-data block at page alignment so a runner can
    /// mmap them straight out of the corpus file; everything else goes to the
    /// byte-data block at 8-byte alignment. The dedup table keys on content
    /// alone, so equal payloads always reuse the first sighting's placement.
    fn process_memory_bytes_payload(&mut self, pass: Pass, memory_bytes: &'a MemoryBytes) -> Ref {
        let bytes = memory_bytes.bytes();
        if let Some(&existing) = self.byte_data_refs.get(bytes) {
            if pass == Pass::Emit {
                // Equal keys must have landed on identical stored bytes.
                debug_assert_eq!(&self.image[existing.byte_range(bytes.len())], bytes);
            }
            return existing;
        }

        let page_aligned = is_page_aligned(memory_bytes.start_address())
            && is_page_aligned(memory_bytes.num_bytes());
        let r = if page_aligned {
            self.page_data_block
                .allocate(memory_bytes.num_bytes(), PAGE_SIZE)
        } else {
            self.byte_data_block
                .allocate(memory_bytes.num_bytes(), RECORD_ALIGNMENT)
        };
        self.byte_data_refs.insert(bytes, r);

        if pass == Pass::Emit {
            self.image[r.byte_range(bytes.len())].copy_from_slice(bytes);
        }
        r
    }

    /// Fills one preallocated MemoryBytes record.
    fn process_memory_bytes_record(
        &mut self,
        pass: Pass,
        memory_bytes: &'a MemoryBytes,
        record_ref: Ref,
    ) {
        let compress = self.options.compress_repeating_bytes
            && is_repeating_byte_run(memory_bytes.bytes());
        let payload_ref = if compress {
            None
        } else {
            Some(self.process_memory_bytes_payload(pass, memory_bytes))
        };

        if pass == Pass::Emit {
            let data = match payload_ref {
                None => MemoryBytesData::ByteRun {
                    value: memory_bytes.bytes()[0],
                    size: memory_bytes.num_bytes(),
                },
                Some(payload) => MemoryBytesData::ByteValues {
                    size: memory_bytes.num_bytes(),
                    elements: payload.load_address(),
                },
            };
            let record = MemoryBytesRecord {
                start_address: memory_bytes.start_address(),
                data,
            };
            record.write_to(&mut self.image[record_ref.byte_range(MemoryBytesRecord::SIZE)]);
        }
    }

    /// Allocates the contiguous MemoryBytes record array for `list` and
    /// processes each element. Returns the ref to the array start.
    fn process_memory_bytes_list(&mut self, pass: Pass, list: &[&'a MemoryBytes]) -> Ref {
        let elements_ref = self.memory_bytes_block.allocate_records(
            list.len() as u64,
            MemoryBytesRecord::SIZE as u64,
            RECORD_ALIGNMENT,
        );
        let mut record_ref = elements_ref;
        for memory_bytes in list {
            self.process_memory_bytes_record(pass, memory_bytes, record_ref);
            record_ref = record_ref + MemoryBytesRecord::SIZE as u64;
        }
        elements_ref
    }

    /// Fills one preallocated MemoryMapping record, including the checksum
    /// over its payloads in stored order.
    fn process_memory_mapping(
        &mut self,
        pass: Pass,
        mapping: &MemoryMapping,
        bytes_list: &[&'a MemoryBytes],
        mapping_ref: Ref,
    ) {
        let elements_ref = self.process_memory_bytes_list(pass, bytes_list);

        if pass == Pass::Emit {
            let mut checksum = MemoryChecksumCalculator::new();
            for memory_bytes in bytes_list {
                checksum.add_data(memory_bytes.bytes());
            }
            let record = MemoryMappingRecord {
                start_address: mapping.start_address(),
                num_bytes: mapping.num_bytes(),
                perms: mapping.perms().to_mprotect(),
                memory_checksum: checksum.checksum(),
                memory_bytes: ArrayDescriptor {
                    size: bytes_list.len() as u64,
                    elements: elements_ref.load_address(),
                },
            };
            record.write_to(&mut self.image[mapping_ref.byte_range(MemoryMappingRecord::SIZE)]);
        }
    }

    /// Allocates the MemoryMapping record array for a snapshot and processes
    /// each mapping with its grouped payloads.
    fn process_memory_mappings(
        &mut self,
        pass: Pass,
        mappings: &[MemoryMapping],
        bytes_per_mapping: &[Vec<&'a MemoryBytes>],
    ) -> Ref {
        let elements_ref = self.memory_mapping_block.allocate_records(
            mappings.len() as u64,
            MemoryMappingRecord::SIZE as u64,
            RECORD_ALIGNMENT,
        );
        let mut mapping_ref = elements_ref;
        for (mapping, bytes_list) in mappings.iter().zip(bytes_per_mapping) {
            self.process_memory_mapping(pass, mapping, bytes_list, mapping_ref);
            mapping_ref = mapping_ref + MemoryMappingRecord::SIZE as u64;
        }
        elements_ref
    }

    /// Stores one deduplicated register block and returns its ref.
    ///
    /// The serialized bytes are both the dedup key and the stored content;
    /// the in-image form of a register block is the serialized form. Empty
    /// input means "undefined registers", permitted only where the caller
    /// says so, and is stored as all zeros.
    fn process_register_set(
        &mut self,
        pass: Pass,
        snapshot_id: &str,
        kind: RegisterKind,
        serialized: &'a [u8],
        allow_empty: bool,
    ) -> Result<Ref> {
        let (block, refs, block_size) = match kind {
            RegisterKind::Greg => (&mut self.gregs_block, &mut self.gregs_refs, A::GREGS_SIZE),
            RegisterKind::Fpreg => (&mut self.fpregs_block, &mut self.fpregs_refs, A::FPREGS_SIZE),
        };

        if let Some(&existing) = refs.get(serialized) {
            return Ok(existing);
        }

        if serialized.is_empty() {
            if !allow_empty {
                return Err(CorpusError::BadRegisterData {
                    id: snapshot_id.to_string(),
                    kind: kind.name(),
                    expected: block_size,
                    actual: 0,
                });
            }
        } else if serialized.len() != block_size {
            return Err(CorpusError::BadRegisterData {
                id: snapshot_id.to_string(),
                kind: kind.name(),
                expected: block_size,
                actual: serialized.len(),
            });
        }

        let r = block.allocate(block_size as u64, RECORD_ALIGNMENT);
        refs.insert(serialized, r);

        // The buffer is zero-initialized, so empty ("undefined") register
        // state needs no write.
        if pass == Pass::Emit && !serialized.is_empty() {
            self.image[r.byte_range(serialized.len())].copy_from_slice(serialized);
        }
        Ok(r)
    }

    /// Processes both register blocks of a register state. In the emission
    /// pass, also computes the checksum over the state as stored in the
    /// image (the register-memory checksum the runner compares against).
    fn process_register_state(
        &mut self,
        pass: Pass,
        snapshot_id: &str,
        registers: &'a RegisterState,
        allow_empty: bool,
    ) -> Result<(RegisterStateRefs, u32)> {
        let gregs = self.process_register_set(
            pass,
            snapshot_id,
            RegisterKind::Greg,
            registers.gregs(),
            allow_empty,
        )?;
        let fpregs = self.process_register_set(
            pass,
            snapshot_id,
            RegisterKind::Fpreg,
            registers.fpregs(),
            allow_empty,
        )?;
        let refs = RegisterStateRefs { fpregs, gregs };

        let memory_checksum = if pass == Pass::Emit {
            let mut checksum = MemoryChecksumCalculator::new();
            checksum.add_data(&self.image[refs.fpregs.byte_range(A::FPREGS_SIZE)]);
            checksum.add_data(&self.image[refs.gregs.byte_range(A::GREGS_SIZE)]);
            checksum.checksum()
        } else {
            0
        };
        Ok((refs, memory_checksum))
    }

    /// Processes one snapshot into its preallocated Snap record.
    ///
    /// Walk order is part of the format contract: id, mappings in input order
    /// (payloads in input order within each), end-state payloads, entry
    /// registers, end-state registers.
    fn process_snapshot(&mut self, pass: Pass, snapshot: &'a Snapshot, snap_ref: Ref) -> Result<()> {
        if snapshot.architecture_id() != A::ID {
            return Err(CorpusError::ArchitectureMismatch {
                id: snapshot.id().to_string(),
                expected: A::ID,
                actual: snapshot.architecture_id(),
            });
        }

        let id_len = snapshot.id().len() as u64 + 1; // NUL terminator
        let id_ref = self.string_block.allocate(id_len, 1);

        let bytes_per_mapping = split_bytes_by_mapping(snapshot)?;
        let mappings_ref =
            self.process_memory_mappings(pass, snapshot.memory_mappings(), &bytes_per_mapping);

        let end_state = snapshot.expected_end_state()?;
        let end_state_bytes: Vec<&'a MemoryBytes> = end_state.memory_bytes().iter().collect();
        let end_state_bytes_ref = self.process_memory_bytes_list(pass, &end_state_bytes);

        let (register_refs, registers_memory_checksum) =
            self.process_register_state(pass, snapshot.id(), snapshot.registers(), false)?;
        let (end_register_refs, end_registers_memory_checksum) =
            self.process_register_state(pass, snapshot.id(), end_state.registers(), true)?;

        let end_state_register_checksum =
            RegisterChecksum::deserialize(end_state.register_checksum()).ok_or_else(|| {
                CorpusError::BadRegisterChecksum {
                    id: snapshot.id().to_string(),
                    len: end_state.register_checksum().len(),
                    expected: REGISTER_CHECKSUM_BYTES,
                }
            })?;

        if pass == Pass::Emit {
            let id_range = id_ref.byte_range(snapshot.id().len());
            self.image[id_range].copy_from_slice(snapshot.id().as_bytes());
            // The NUL terminator is already present: the buffer is
            // zero-initialized and never written twice.

            let record = SnapRecord {
                id: id_ref.load_address(),
                memory_mappings: ArrayDescriptor {
                    size: snapshot.memory_mappings().len() as u64,
                    elements: mappings_ref.load_address(),
                },
                registers: register_refs.view(),
                end_state_instruction_address: end_state.instruction_address(),
                end_state_registers: end_register_refs.view(),
                end_state_memory_bytes: ArrayDescriptor {
                    size: end_state_bytes.len() as u64,
                    elements: end_state_bytes_ref.load_address(),
                },
                end_state_register_checksum,
                registers_memory_checksum,
                end_state_registers_memory_checksum: end_registers_memory_checksum,
            };
            record.write_to(&mut self.image[snap_ref.byte_range(SnapRecord::SIZE)]);
        }
        Ok(())
    }

    /// Runs one pass over all snapshots and returns the per-block sizes.
    fn process(&mut self, pass: Pass, snapshots: &'a [Snapshot]) -> Result<HashMap<String, u64>> {
        let corpus_ref = self
            .snap_block
            .allocate(CorpusRecord::SIZE as u64, RECORD_ALIGNMENT);
        // The corpus references its snaps through a pointer array, so the
        // runner can treat snaps as individually addressable records.
        let snap_pointers_ref = self.snap_block.allocate_records(
            snapshots.len() as u64,
            std::mem::size_of::<u64>() as u64,
            RECORD_ALIGNMENT,
        );
        let snaps_ref = self.snap_block.allocate_records(
            snapshots.len() as u64,
            SnapRecord::SIZE as u64,
            RECORD_ALIGNMENT,
        );

        for (i, snapshot) in snapshots.iter().enumerate() {
            let snap_ref = snaps_ref + i as u64 * SnapRecord::SIZE as u64;
            self.process_snapshot(pass, snapshot, snap_ref)?;
        }

        // Compose the sub-blocks into the main block. Pointer-bearing blocks
        // first, pointer-free blocks after; see the module docs.
        self.main_block.allocate_block(&self.snap_block);
        self.main_block.allocate_block(&self.memory_bytes_block);
        self.main_block.allocate_block(&self.memory_mapping_block);
        self.main_block.allocate_block(&self.byte_data_block);
        self.main_block.allocate_block(&self.string_block);
        self.main_block.allocate_block(&self.fpregs_block);
        self.main_block.allocate_block(&self.gregs_block);
        self.main_block.allocate_block(&self.page_data_block);

        if pass == Pass::Emit {
            let num_bytes = self.main_block.size();
            debug_assert_eq!(num_bytes as usize, self.image.len());

            let corpus = CorpusRecord {
                header: CorpusHeader {
                    magic: CORPUS_MAGIC,
                    header_size: CorpusHeader::SIZE as u32,
                    checksum: 0,
                    num_bytes,
                    corpus_type_size: CorpusRecord::SIZE as u32,
                    snap_type_size: SnapRecord::SIZE as u32,
                    register_state_type_size: RegisterStateView::SIZE as u32,
                    architecture_id: A::ID as u8,
                },
                snaps: ArrayDescriptor {
                    size: snapshots.len() as u64,
                    elements: snap_pointers_ref.load_address(),
                },
            };
            corpus.write_to(&mut self.image[corpus_ref.byte_range(CorpusRecord::SIZE)]);

            for i in 0..snapshots.len() as u64 {
                let snap_ref = snaps_ref + i * SnapRecord::SIZE as u64;
                let element_ref = snap_pointers_ref + i * std::mem::size_of::<u64>() as u64;
                self.image[element_ref.byte_range(8)]
                    .copy_from_slice(&snap_ref.load_address().to_le_bytes());
            }

            // The checksum field is still zero in the buffer, so hashing the
            // image as-is computes exactly the zeroed-field digest.
            let mut checksum = CorpusChecksumCalculator::new();
            checksum.add_data(&self.image);
            let value = checksum.checksum();
            let field = CorpusHeader::CHECKSUM_OFFSET;
            self.image[field..field + 4].copy_from_slice(&value.to_le_bytes());
        }

        Ok(self.block_sizes())
    }

    /// Places the sub-blocks inside the main block and resets everything for
    /// the emission pass. Must run between the two passes.
    fn prepare(&mut self) {
        let total = self.main_block.size();
        self.image = vec![0u8; total as usize];
        self.main_block.set_base(0, NOMINAL_LOAD_ADDRESS, total);
        self.main_block.reset_size_and_alignment();

        fn prepare_sub_block(main: &mut DataBlock, sub: &mut DataBlock) {
            let r = main.allocate_block(sub);
            sub.set_base(r.image_offset(), r.load_address(), sub.size());
            sub.reset_size_and_alignment();
        }
        prepare_sub_block(&mut self.main_block, &mut self.snap_block);
        prepare_sub_block(&mut self.main_block, &mut self.memory_bytes_block);
        prepare_sub_block(&mut self.main_block, &mut self.memory_mapping_block);
        prepare_sub_block(&mut self.main_block, &mut self.byte_data_block);
        prepare_sub_block(&mut self.main_block, &mut self.string_block);
        prepare_sub_block(&mut self.main_block, &mut self.fpregs_block);
        prepare_sub_block(&mut self.main_block, &mut self.gregs_block);
        prepare_sub_block(&mut self.main_block, &mut self.page_data_block);

        // The emission pass re-walks the main block from zero as well.
        self.main_block.reset_size_and_alignment();

        self.byte_data_refs.clear();
        self.fpregs_refs.clear();
        self.gregs_refs.clear();
    }

    fn block_sizes(&self) -> HashMap<String, u64> {
        HashMap::from([
            ("main_block".to_string(), self.main_block.size()),
            ("snap_block".to_string(), self.snap_block.size()),
            (
                "memory_bytes_block".to_string(),
                self.memory_bytes_block.size(),
            ),
            (
                "memory_mapping_block".to_string(),
                self.memory_mapping_block.size(),
            ),
            ("byte_data_block".to_string(), self.byte_data_block.size()),
            ("string_block".to_string(), self.string_block.size()),
            ("fpregs_block".to_string(), self.fpregs_block.size()),
            ("gregs_block".to_string(), self.gregs_block.size()),
            ("page_data_block".to_string(), self.page_data_block.size()),
        ])
    }
}

fn generate_impl<A: Arch>(
    snapshots: &[Snapshot],
    options: &CorpusOptions,
) -> Result<RelocatableCorpus> {
    let mut traversal = Traversal::<A>::new(*options);
    traversal.process(Pass::Layout, snapshots)?;

    // The runner mmaps the corpus, so nothing inside may need alignment
    // beyond a page.
    let alignment = traversal.main_block.required_alignment();
    if alignment > PAGE_SIZE {
        return Err(CorpusError::AlignmentTooLarge {
            alignment,
            page_size: PAGE_SIZE,
        });
    }
    let layout_size = traversal.main_block.size();
    debug!(
        total_bytes = layout_size,
        required_alignment = alignment,
        "layout pass complete"
    );

    traversal.prepare();
    let block_sizes = traversal.process(Pass::Emit, snapshots)?;
    debug_assert_eq!(traversal.main_block.size(), layout_size);
    debug_assert_eq!(traversal.main_block.required_alignment(), alignment);

    info!(
        snapshots = snapshots.len(),
        image_bytes = traversal.image.len(),
        architecture = %A::ID,
        "relocatable corpus emitted"
    );
    Ok(RelocatableCorpus {
        image: traversal.image,
        block_sizes,
    })
}

/// Builds a relocatable corpus image from `snapshots`.
///
/// Snapshots must all belong to `architecture_id` and be canonicalized
/// (exactly one expected end state, memory payloads contained in mappings).
/// The returned image embeds nominal pointers valued for load address zero.
pub fn generate_relocatable_corpus(
    architecture_id: ArchitectureId,
    snapshots: &[Snapshot],
    options: &CorpusOptions,
) -> Result<RelocatableCorpus> {
    match architecture_id {
        ArchitectureId::Undefined => Err(CorpusError::UndefinedArchitecture),
        ArchitectureId::X86_64 => generate_impl::<X86_64>(snapshots, options),
        ArchitectureId::AArch64 => generate_impl::<AArch64>(snapshots, options),
    }
}
