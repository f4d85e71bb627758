//! Address -> block table backing the allocator bridge.
//!
//! Every block native code receives through the bridge comes from the Rust
//! global allocator and is recorded here under its address. The table is the
//! only owner: `free` and `reallocate` look the address up to recover the
//! layout, and an address is removed from the table before its memory is
//! returned, so a table entry always names live memory. Rust heap blocks
//! never move, which is what lets native code hold the raw address.
//!
//! Sizes are rounded up to [`GRANULARITY`] (the pointer width). A
//! `reallocate` whose rounded size equals the block's capacity keeps the same
//! address.
//!
//! Thread-safe via sharded `parking_lot::Mutex`.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::POISON_BYTE;
use crate::metrics::{BridgeMetrics, global_metrics};

/// Allocation rounding unit: the host pointer width.
pub const GRANULARITY: usize = std::mem::size_of::<usize>();

/// Alignment of every block; matches what C `malloc` guarantees on 64-bit targets.
const BLOCK_ALIGN: usize = 16;

/// Number of shards for table locks (power of 2).
const NUM_SHARDS: usize = 16;

/// Bookkeeping for one live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    /// Address handed to native code.
    pub addr: usize,
    /// Size the caller last asked for.
    pub size: usize,
    /// Bytes actually reserved (`size` rounded up to [`GRANULARITY`]).
    pub capacity: usize,
    /// Monotonic allocation stamp.
    pub generation: u64,
}

/// Live block count and reserved bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub live_blocks: usize,
    pub tracked_bytes: usize,
}

/// Result of a free operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeResult {
    /// Block was tracked and has been returned to the host allocator.
    Released,
    /// Null pointer; nothing to do.
    Null,
    /// Address the table never issued (or already released). Ignored.
    Foreign,
}

struct TableShard {
    blocks: HashMap<usize, BlockRecord>,
}

/// Thread-safe table of blocks handed out to native code.
pub struct AllocationTable {
    shards: Box<[Mutex<TableShard>]>,
    next_generation: AtomicU64,
    live_blocks: AtomicUsize,
    tracked_bytes: AtomicUsize,
    poison_freed: bool,
}

impl AllocationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_poison(false)
    }

    /// Create an empty table that poisons released blocks when `poison_freed` is set.
    #[must_use]
    pub fn with_poison(poison_freed: bool) -> Self {
        let shards: Vec<Mutex<TableShard>> = (0..NUM_SHARDS)
            .map(|_| {
                Mutex::new(TableShard {
                    blocks: HashMap::new(),
                })
            })
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            next_generation: AtomicU64::new(1),
            live_blocks: AtomicUsize::new(0),
            tracked_bytes: AtomicUsize::new(0),
            poison_freed,
        }
    }

    /// Round `size` up to the table's granularity. `None` on overflow.
    #[must_use]
    pub fn round_to_granularity(size: usize) -> Option<usize> {
        size.checked_next_multiple_of(GRANULARITY)
    }

    /// Allocate at least `size` bytes.
    ///
    /// Returns `None` for `size == 0` and for sizes no layout can describe.
    /// Host allocator exhaustion is fatal (`handle_alloc_error`).
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_block(size, false)
    }

    /// Allocate `count * element_size` zeroed bytes.
    ///
    /// Returns `None` when the product is zero or overflows.
    pub fn allocate_zeroed(&self, count: usize, element_size: usize) -> Option<NonNull<u8>> {
        let size = count.checked_mul(element_size)?;
        self.allocate_block(size, true)
    }

    /// Resize the block at `ptr`.
    ///
    /// - null or untracked `ptr`: behaves as [`allocate`](Self::allocate)
    /// - `new_size == 0`: frees and returns `None`
    /// - same rounded capacity: returns `ptr` unchanged
    /// - otherwise: new block, copy of `min(old, new)` bytes, old block freed
    ///
    /// On a size that cannot be allocated the old block is left untouched and
    /// `None` is returned.
    pub fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            let _ = self.free(ptr);
            return None;
        }

        let addr = ptr.addr();
        let new_capacity = Self::round_to_granularity(new_size)?;
        let old = {
            let mut shard = self.shard_for(addr).lock();
            let Some(record) = shard.blocks.get_mut(&addr) else {
                drop(shard);
                return self.allocate(new_size);
            };
            if record.capacity == new_capacity {
                record.size = new_size;
                drop(shard);
                BridgeMetrics::inc(&global_metrics().reallocs_in_place);
                return NonNull::new(ptr);
            }
            *record
        };

        let new_ptr = self.allocate(new_size)?;
        let copy_len = old.size.min(new_size);
        // SAFETY: `ptr` is a live block of at least `old.size` bytes, `new_ptr`
        // a fresh block of at least `new_size` bytes; distinct allocations.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.cast_const(), new_ptr.as_ptr(), copy_len);
        }
        let _ = self.free(ptr);
        BridgeMetrics::inc(&global_metrics().reallocs_moved);
        Some(new_ptr)
    }

    /// Release the block at `ptr`. Null and untracked addresses are ignored.
    pub fn free(&self, ptr: *mut u8) -> FreeResult {
        if ptr.is_null() {
            return FreeResult::Null;
        }
        let addr = ptr.addr();
        let removed = self.shard_for(addr).lock().blocks.remove(&addr);
        let Some(record) = removed else {
            BridgeMetrics::inc(&global_metrics().foreign_frees);
            return FreeResult::Foreign;
        };

        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.tracked_bytes.fetch_sub(record.capacity, Ordering::Relaxed);
        // SAFETY: the record was just removed, so no other caller can reach
        // this block through the table; it was allocated with this capacity.
        unsafe { release_block(ptr, record.capacity, self.poison_freed) };
        BridgeMetrics::inc(&global_metrics().frees);
        FreeResult::Released
    }

    /// Record for the block starting at `addr`, if tracked.
    #[must_use]
    pub fn lookup(&self, addr: usize) -> Option<BlockRecord> {
        self.shard_for(addr).lock().blocks.get(&addr).copied()
    }

    /// True when `addr` is the start of a tracked block.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.lookup(addr).is_some()
    }

    /// Live block count and total reserved bytes.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            live_blocks: self.live_blocks.load(Ordering::Relaxed),
            tracked_bytes: self.tracked_bytes.load(Ordering::Relaxed),
        }
    }

    fn allocate_block(&self, size: usize, zeroed: bool) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let capacity = Self::round_to_granularity(size)?;
        let layout = Layout::from_size_align(capacity, BLOCK_ALIGN).ok()?;

        // SAFETY: layout has non-zero size and a power-of-two alignment.
        let raw = unsafe {
            if zeroed {
                std::alloc::alloc_zeroed(layout)
            } else {
                std::alloc::alloc(layout)
            }
        };
        let Some(ptr) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout);
        };

        let record = BlockRecord {
            addr: ptr.as_ptr().expose_provenance(),
            size,
            capacity,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };
        self.shard_for(record.addr)
            .lock()
            .blocks
            .insert(record.addr, record);
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.tracked_bytes.fetch_add(capacity, Ordering::Relaxed);

        let metrics = global_metrics();
        BridgeMetrics::inc(&metrics.allocations);
        if zeroed {
            BridgeMetrics::inc(&metrics.zeroed_allocations);
        }
        Some(ptr)
    }

    fn shard_for(&self, addr: usize) -> &Mutex<TableShard> {
        // Blocks are 16-byte aligned; skip the always-zero low bits.
        &self.shards[(addr >> 4) % NUM_SHARDS]
    }
}

impl Default for AllocationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AllocationTable {
    fn drop(&mut self) {
        let poison = self.poison_freed;
        for shard in self.shards.iter_mut() {
            for (addr, record) in shard.get_mut().blocks.drain() {
                // SAFETY: the table is being destroyed; nothing else can reach
                // these blocks through it. The address was exposed on allocation.
                unsafe {
                    release_block(
                        std::ptr::with_exposed_provenance_mut(addr),
                        record.capacity,
                        poison,
                    );
                }
            }
        }
    }
}

/// Return a block to the host allocator.
///
/// # Safety
///
/// `ptr` must have come from `AllocationTable::allocate_block` with this
/// `capacity` and must no longer be reachable through the table.
unsafe fn release_block(ptr: *mut u8, capacity: usize, poison: bool) {
    if poison {
        // SAFETY: block is valid for `capacity` bytes until deallocated below.
        unsafe { std::ptr::write_bytes(ptr, POISON_BYTE, capacity) };
    }
    // SAFETY: the same size/alignment pair passed `Layout::from_size_align`
    // when the block was allocated.
    unsafe {
        let layout = Layout::from_size_align_unchecked(capacity, BLOCK_ALIGN);
        std::alloc::dealloc(ptr, layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
        // SAFETY: test blocks are valid for at least `len` bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), byte, len) };
    }

    fn read(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        // SAFETY: test blocks are valid for at least `len` bytes.
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len).to_vec() }
    }

    #[test]
    fn zero_size_allocates_nothing() {
        let table = AllocationTable::new();
        assert!(table.allocate(0).is_none());
        assert!(table.allocate_zeroed(0, 8).is_none());
        assert!(table.allocate_zeroed(8, 0).is_none());
        assert_eq!(table.stats(), TableStats::default());
    }

    #[test]
    fn allocate_rounds_to_granularity() {
        let table = AllocationTable::new();
        let ptr = table.allocate(13).expect("alloc");
        let record = table.lookup(ptr.addr().get()).expect("tracked");
        assert_eq!(record.size, 13);
        assert_eq!(record.capacity, 13_usize.next_multiple_of(GRANULARITY));
        assert_eq!(table.stats().tracked_bytes, record.capacity);
        assert_eq!(ptr.addr().get() % BLOCK_ALIGN, 0);
    }

    #[test]
    fn free_null_and_foreign_are_noops() {
        let table = AllocationTable::new();
        assert_eq!(table.free(std::ptr::null_mut()), FreeResult::Null);
        let mut local = 0u64;
        let foreign = std::ptr::addr_of_mut!(local).cast::<u8>();
        assert_eq!(table.free(foreign), FreeResult::Foreign);
    }

    #[test]
    fn double_free_reports_foreign() {
        let table = AllocationTable::new();
        let ptr = table.allocate(32).expect("alloc");
        assert_eq!(table.free(ptr.as_ptr()), FreeResult::Released);
        assert_eq!(table.free(ptr.as_ptr()), FreeResult::Foreign);
        assert_eq!(table.stats(), TableStats::default());
    }

    #[test]
    fn calloc_overflow_is_null() {
        let table = AllocationTable::new();
        assert!(table.allocate_zeroed(usize::MAX, 2).is_none());
    }

    #[test]
    fn calloc_is_zeroed() {
        let table = AllocationTable::new();
        let ptr = table.allocate_zeroed(16, 4).expect("alloc");
        assert!(read(ptr, 64).iter().all(|&b| b == 0));
    }

    #[test]
    fn huge_request_is_null_not_abort() {
        let table = AllocationTable::new();
        assert!(table.allocate(usize::MAX - 3).is_none());
        assert!(table.allocate(isize::MAX as usize).is_none());
    }

    #[test]
    fn realloc_same_size_keeps_address() {
        let table = AllocationTable::new();
        let ptr = table.allocate(16).expect("alloc");
        let again = table.reallocate(ptr.as_ptr(), 16).expect("realloc");
        assert_eq!(again, ptr);
    }

    #[test]
    fn realloc_within_bucket_updates_size() {
        let table = AllocationTable::new();
        let ptr = table.allocate(GRANULARITY * 2).expect("alloc");
        let again = table
            .reallocate(ptr.as_ptr(), GRANULARITY * 2 - 1)
            .expect("realloc");
        assert_eq!(again, ptr);
        let record = table.lookup(ptr.addr().get()).expect("tracked");
        assert_eq!(record.size, GRANULARITY * 2 - 1);
        assert_eq!(record.capacity, GRANULARITY * 2);
    }

    #[test]
    fn realloc_grow_preserves_prefix() {
        let table = AllocationTable::new();
        let ptr = table.allocate(24).expect("alloc");
        fill(ptr, 24, 0x5A);
        let grown = table.reallocate(ptr.as_ptr(), 200).expect("realloc");
        assert_ne!(grown, ptr);
        assert_eq!(read(grown, 24), vec![0x5A; 24]);
        assert!(!table.contains(ptr.addr().get()));
        assert_eq!(table.stats().live_blocks, 1);
    }

    #[test]
    fn realloc_shrink_keeps_leading_bytes() {
        let table = AllocationTable::new();
        let ptr = table.allocate(128).expect("alloc");
        for i in 0..128 {
            // SAFETY: block is 128 bytes.
            unsafe { ptr.as_ptr().add(i).write(i as u8) };
        }
        let shrunk = table.reallocate(ptr.as_ptr(), 10).expect("realloc");
        assert_eq!(read(shrunk, 10), (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn realloc_to_zero_frees() {
        let table = AllocationTable::new();
        let ptr = table.allocate(64).expect("alloc");
        assert!(table.reallocate(ptr.as_ptr(), 0).is_none());
        assert!(!table.contains(ptr.addr().get()));
        assert_eq!(table.stats(), TableStats::default());
    }

    #[test]
    fn realloc_null_or_foreign_behaves_as_malloc() {
        let table = AllocationTable::new();
        let fresh = table.reallocate(std::ptr::null_mut(), 40).expect("alloc");
        assert!(table.contains(fresh.addr().get()));

        let mut local = [0u8; 16];
        let foreign = table.reallocate(local.as_mut_ptr(), 16).expect("alloc");
        assert_ne!(foreign.as_ptr(), local.as_mut_ptr());
        assert!(table.contains(foreign.addr().get()));
        assert_eq!(table.stats().live_blocks, 2);
    }

    #[test]
    fn realloc_overflow_leaves_block_alone() {
        let table = AllocationTable::new();
        let ptr = table.allocate(8).expect("alloc");
        assert!(table.reallocate(ptr.as_ptr(), usize::MAX).is_none());
        assert!(table.contains(ptr.addr().get()));
    }

    #[test]
    fn generations_increase() {
        let table = AllocationTable::new();
        let a = table.allocate(8).expect("alloc");
        let b = table.allocate(8).expect("alloc");
        let ra = table.lookup(a.addr().get()).expect("tracked");
        let rb = table.lookup(b.addr().get()).expect("tracked");
        assert!(rb.generation > ra.generation);
    }

    #[test]
    fn poisoning_table_still_frees_cleanly() {
        let table = AllocationTable::with_poison(true);
        let ptr = table.allocate(48).expect("alloc");
        fill(ptr, 48, 0x11);
        assert_eq!(table.free(ptr.as_ptr()), FreeResult::Released);
        assert_eq!(table.stats(), TableStats::default());
    }
}
