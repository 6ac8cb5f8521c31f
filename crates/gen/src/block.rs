//! Growable data blocks and offset refs.
//!
//! A [`DataBlock`] is a logical region of the corpus with a two-phase
//! lifecycle. During layout it only accumulates a size and a required
//! alignment; allocations return [`Ref`]s that record nothing but an offset.
//! Between passes the block is given a *base* (its placement inside the
//! final image and its load address), after which allocations return *bound*
//! refs that can also yield an image byte range and a nominal load address.
//!
//! Allocation is deterministic: the same sequence of calls always produces
//! the same offsets. The emission pass relies on this by re-running the
//! layout-pass allocations verbatim against based blocks.
//!
//! Refs are offset handles rather than pointers, so the image buffer can be
//! owned in one place and blocks never alias it.

use snapcorpus_core::round_up;
use std::ops::{Add, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockBase {
    image_offset: u64,
    load_address: u64,
    capacity: u64,
}

/// A handle to a sub-region of a [`DataBlock`].
///
/// Plain value, cheap to copy. A ref allocated before its block has a base is
/// *unbound*: it knows its offset within the block, but neither its position
/// in the image nor its load address. Calling [`Ref::image_offset`] or
/// [`Ref::load_address`] on an unbound ref is a programmer error (the layout
/// pass must not touch contents or addresses) and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref {
    offset: u64,
    bound: Option<BlockBase>,
}

impl Ref {
    /// Byte offset within the owning block.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns true once the owning block had a base when this ref was
    /// allocated.
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Byte offset within the final image.
    ///
    /// # Panics
    ///
    /// Panics if the ref is unbound.
    pub fn image_offset(&self) -> u64 {
        self.expect_bound().image_offset + self.offset
    }

    /// Nominal address this ref will have at runtime.
    ///
    /// # Panics
    ///
    /// Panics if the ref is unbound.
    pub fn load_address(&self) -> u64 {
        self.expect_bound().load_address + self.offset
    }

    /// Image byte range covering `len` bytes at this ref.
    ///
    /// # Panics
    ///
    /// Panics if the ref is unbound.
    pub fn byte_range(&self, len: usize) -> Range<usize> {
        let start = self.image_offset() as usize;
        start..start + len
    }

    fn expect_bound(&self) -> &BlockBase {
        self.bound
            .as_ref()
            .expect("ref used for contents or addresses before its block has a base")
    }
}

impl Add<u64> for Ref {
    type Output = Ref;

    /// Advances the ref by `bytes`, e.g. to step through an array of records.
    fn add(self, bytes: u64) -> Ref {
        Ref {
            offset: self.offset + bytes,
            bound: self.bound,
        }
    }
}

/// A growable logical region of the corpus.
///
/// See the module docs for the two-phase lifecycle. Between resets, size and
/// required alignment are monotonically non-decreasing.
#[derive(Debug)]
pub struct DataBlock {
    size: u64,
    alignment: u64,
    base: Option<BlockBase>,
}

impl Default for DataBlock {
    fn default() -> Self {
        DataBlock::new()
    }
}

impl DataBlock {
    /// Creates an empty block with alignment 1 and no base.
    pub fn new() -> Self {
        DataBlock {
            size: 0,
            alignment: 1,
            base: None,
        }
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Largest alignment any allocation has required so far.
    pub fn required_alignment(&self) -> u64 {
        self.alignment
    }

    /// Nominal load address of the block's start.
    ///
    /// # Panics
    ///
    /// Panics if the block has no base.
    pub fn load_address(&self) -> u64 {
        self.base
            .as_ref()
            .expect("block has no base")
            .load_address
    }

    /// Reserves `size` bytes at alignment `alignment` and returns a ref to
    /// the start of the reservation.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two, or if the block has a
    /// base and the allocation would exceed its capacity. The latter cannot
    /// happen when the emission pass repeats the layout pass faithfully.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Ref {
        assert!(
            alignment.is_power_of_two(),
            "allocation alignment {alignment} is not a power of two"
        );
        let offset = round_up(self.size, alignment);
        let new_size = offset + size;
        if let Some(base) = &self.base {
            assert!(
                new_size <= base.capacity,
                "allocation overruns block capacity: {new_size} > {}",
                base.capacity
            );
        }
        self.size = new_size;
        self.alignment = self.alignment.max(alignment);
        Ref {
            offset,
            bound: self.base,
        }
    }

    /// Reserves a contiguous array of `count` records of `record_size` bytes
    /// each, aligned to `record_alignment`.
    pub fn allocate_records(
        &mut self,
        count: u64,
        record_size: u64,
        record_alignment: u64,
    ) -> Ref {
        self.allocate(count * record_size, record_alignment)
    }

    /// Reserves space for the current contents of `other`, using its size and
    /// required alignment. Used to compose sub-blocks into a parent.
    pub fn allocate_block(&mut self, other: &DataBlock) -> Ref {
        self.allocate(other.size, other.alignment)
    }

    /// Attaches the block's placement: its offset within the image, its load
    /// address, and the capacity it may grow to.
    ///
    /// # Panics
    ///
    /// Panics if the placement is not aligned to the block's current required
    /// alignment, or if `capacity` is smaller than the current size.
    pub fn set_base(&mut self, image_offset: u64, load_address: u64, capacity: u64) {
        assert!(
            image_offset % self.alignment == 0 && load_address % self.alignment == 0,
            "block base ({image_offset:#x}, {load_address:#x}) misaligned for alignment {}",
            self.alignment
        );
        assert!(
            capacity >= self.size,
            "block capacity {capacity} smaller than current size {}",
            self.size
        );
        self.base = Some(BlockBase {
            image_offset,
            load_address,
            capacity,
        });
    }

    /// Zeroes the size and resets alignment to 1, retaining the base.
    ///
    /// This is what lets the emission pass re-run the layout-pass allocation
    /// sequence and obtain identical offsets.
    pub fn reset_size_and_alignment(&mut self) {
        self.size = 0;
        self.alignment = 1;
    }
}
