//! Memory blocks backing the three slots of a triple buffer

use crate::error::{Error, Result};
use crate::SlotIndex;
use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

/// Strategy used to obtain and release slot memory
///
/// A triple buffer asks its allocator for exactly three blocks when it is
/// built, one per slot, and gives them back when it is dropped. The slot index
/// is passed along so that an allocator can, for instance, place each slot in
/// a separate memory region.
///
/// Blocks of size zero never reach the allocator.
///
/// # Safety
///
/// `allocate` must return either `None` or a pointer to a block that is valid
/// for reads and writes of `layout.size()` bytes, aligned to `layout.align()`,
/// and not aliased by anything else until it is passed back to `free`.
pub unsafe trait BlockAllocator: Send + Sync {
    /// Provide a block of memory for slot `slot`
    fn allocate(&self, slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>>;

    /// Release a block formerly provided for slot `slot`
    ///
    /// # Safety
    ///
    /// `block` must come from a call to `allocate` on this allocator with the
    /// same `slot` and `layout`, and must not be used afterwards.
    unsafe fn free(&self, block: NonNull<u8>, slot: SlotIndex, layout: Layout);
}

// SAFETY: forwards to an allocator that upholds the contract
unsafe impl<A: BlockAllocator + ?Sized> BlockAllocator for &A {
    fn allocate(&self, slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(slot, layout)
    }

    unsafe fn free(&self, block: NonNull<u8>, slot: SlotIndex, layout: Layout) {
        (**self).free(block, slot, layout)
    }
}

/// Default allocator, taking blocks from the global heap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapAllocator;
//
// SAFETY: std::alloc::alloc honors the requested layout
unsafe impl BlockAllocator for HeapAllocator {
    fn allocate(&self, _slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        // SAFETY: layout has a nonzero size
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn free(&self, block: NonNull<u8>, _slot: SlotIndex, layout: Layout) {
        if layout.size() != 0 {
            alloc::dealloc(block.as_ptr(), layout)
        }
    }
}

/// Three equally sized memory blocks, owned for the whole buffer lifetime
///
/// Blocks are zero-filled on allocation, so their bytes are always
/// initialized. SlotStorage is neither `Clone` nor `Copy`: the blocks are
/// released exactly once, when it is dropped.
pub(crate) struct SlotStorage<A: BlockAllocator> {
    blocks: [NonNull<u8>; 3],
    layout: Layout,
    allocator: A,
}
//
impl<A: BlockAllocator> SlotStorage<A> {
    /// Allocate three blocks with the given layout
    pub fn new(layout: Layout, allocator: A) -> Result<Self> {
        let mut blocks = [NonNull::dangling(); 3];
        for slot in 0..3 {
            match Self::allocate_block(&allocator, slot, layout) {
                Some(block) => blocks[slot] = block,
                None => {
                    // Give back whatever we got so far
                    for (done, &block) in blocks.iter().enumerate().take(slot) {
                        Self::free_block(&allocator, block, done, layout);
                    }
                    log::warn!("failed to allocate triple buffer slot {slot} ({layout:?})");
                    return Err(Error::AllocationFailed {
                        slot,
                        size: layout.size(),
                        align: layout.align(),
                    });
                }
            }
        }
        log::debug!("allocated triple buffer slots {blocks:?} ({layout:?})");
        Ok(Self {
            blocks,
            layout,
            allocator,
        })
    }

    /// Allocate three blocks, aborting through the global allocation error
    /// handler on failure
    pub fn new_or_abort(layout: Layout, allocator: A) -> Self {
        match Self::new(layout, allocator) {
            Ok(storage) => storage,
            Err(_) => alloc::handle_alloc_error(layout),
        }
    }

    /// Size of each block in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.size()
    }

    /// Pointer to the block backing slot `slot`
    ///
    /// What may be done with that pointer is dictated by the role the slot
    /// currently holds.
    #[inline]
    pub fn block(&self, slot: SlotIndex) -> NonNull<u8> {
        self.blocks[slot]
    }

    /// Allocator used by this storage
    #[cfg(test)]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    fn allocate_block(allocator: &A, slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        let block = allocator.allocate(slot, layout)?;
        // SAFETY: the allocator contract makes the block writable for
        //         layout.size() bytes
        unsafe { ptr::write_bytes(block.as_ptr(), 0, layout.size()) };
        Some(block)
    }

    fn free_block(allocator: &A, block: NonNull<u8>, slot: SlotIndex, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: block was obtained from allocate_block with this layout
            unsafe { allocator.free(block, slot, layout) }
        }
    }
}
//
impl<A: BlockAllocator> Drop for SlotStorage<A> {
    fn drop(&mut self) {
        log::debug!("releasing triple buffer slots {:?}", self.blocks);
        for (slot, &block) in self.blocks.iter().enumerate() {
            Self::free_block(&self.allocator, block, slot, self.layout);
        }
    }
}
//
// SAFETY: the blocks are plain memory owned by the storage, and access to them
//         is coordinated by the role state of the enclosing buffer
unsafe impl<A: BlockAllocator> Send for SlotStorage<A> {}
unsafe impl<A: BlockAllocator> Sync for SlotStorage<A> {}

/// Well-aligned, non-null pointer for zero-sized blocks
fn dangling(layout: Layout) -> NonNull<u8> {
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Allocator that records what it was asked to do
    #[derive(Debug, Default)]
    struct TrackingAllocator {
        allocated: Mutex<Vec<SlotIndex>>,
        freed: Mutex<Vec<SlotIndex>>,
        fail_at: Option<SlotIndex>,
    }
    //
    unsafe impl BlockAllocator for TrackingAllocator {
        fn allocate(&self, slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>> {
            if self.fail_at == Some(slot) {
                return None;
            }
            self.allocated.lock().unwrap().push(slot);
            HeapAllocator.allocate(slot, layout)
        }

        unsafe fn free(&self, block: NonNull<u8>, slot: SlotIndex, layout: Layout) {
            self.freed.lock().unwrap().push(slot);
            HeapAllocator.free(block, slot, layout)
        }
    }

    /// Allocator that counts live blocks through a shared counter
    #[derive(Debug)]
    struct CountingAllocator<'a>(&'a AtomicUsize);
    //
    unsafe impl BlockAllocator for CountingAllocator<'_> {
        fn allocate(&self, slot: SlotIndex, layout: Layout) -> Option<NonNull<u8>> {
            self.0.fetch_add(1, Ordering::Relaxed);
            HeapAllocator.allocate(slot, layout)
        }

        unsafe fn free(&self, block: NonNull<u8>, slot: SlotIndex, layout: Layout) {
            self.0.fetch_sub(1, Ordering::Relaxed);
            HeapAllocator.free(block, slot, layout)
        }
    }

    #[test]
    fn blocks_are_distinct_and_zeroed() {
        let layout = Layout::from_size_align(32, 8).unwrap();
        let storage = SlotStorage::new(layout, HeapAllocator).unwrap();
        assert_eq!(storage.block_size(), 32);
        for slot in 0..3 {
            let block = storage.block(slot);
            assert_eq!(block.as_ptr() as usize % 8, 0);
            let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 32) };
            assert!(bytes.iter().all(|&b| b == 0));
        }
        assert_ne!(storage.block(0), storage.block(1));
        assert_ne!(storage.block(1), storage.block(2));
        assert_ne!(storage.block(0), storage.block(2));
    }

    #[test]
    fn every_slot_freed_once() {
        let layout = Layout::from_size_align(16, 1).unwrap();
        let storage = SlotStorage::new(layout, TrackingAllocator::default()).unwrap();
        assert_eq!(*storage.allocator().allocated.lock().unwrap(), vec![0, 1, 2]);
        assert!(storage.allocator().freed.lock().unwrap().is_empty());

        let live = AtomicUsize::new(0);
        {
            let _storage = SlotStorage::new(layout, CountingAllocator(&live)).unwrap();
            assert_eq!(live.load(Ordering::Relaxed), 3);
        }
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn failed_allocation_releases_earlier_slots() {
        let layout = Layout::from_size_align(16, 1).unwrap();
        let allocator = TrackingAllocator {
            fail_at: Some(2),
            ..Default::default()
        };
        let result = SlotStorage::new(layout, &allocator);
        assert_eq!(
            result.err(),
            Some(Error::AllocationFailed {
                slot: 2,
                size: 16,
                align: 1,
            })
        );
        assert_eq!(*allocator.allocated.lock().unwrap(), vec![0, 1]);
        assert_eq!(*allocator.freed.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn zero_sized_blocks_skip_allocator() {
        let layout = Layout::from_size_align(0, 16).unwrap();
        let storage = SlotStorage::new(layout, TrackingAllocator::default()).unwrap();
        assert!(storage.allocator().allocated.lock().unwrap().is_empty());
        assert_eq!(storage.block(0).as_ptr() as usize % 16, 0);
    }

    #[test]
    fn heap_allocator_zero_sized() {
        let layout = Layout::from_size_align(0, 8).unwrap();
        let block = HeapAllocator.allocate(0, layout).unwrap();
        assert_eq!(block, dangling(layout));
        assert_eq!(block.as_ptr() as usize % 8, 0);
        unsafe { HeapAllocator.free(block, 0, layout) };

        let layout = Layout::from_size_align(24, 8).unwrap();
        let block = HeapAllocator.allocate(1, layout).unwrap();
        assert_ne!(block, dangling(layout));
        assert_eq!(block.as_ptr() as usize % 8, 0);
        unsafe { HeapAllocator.free(block, 1, layout) };
    }
}
