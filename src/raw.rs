//! Triple buffer of untyped, fixed-size byte blocks

use crate::config::{Config, OversizePolicy};
use crate::error::{Error, Result};
use crate::state::RoleState;
use crate::storage::{BlockAllocator, HeapAllocator, SlotStorage};
use crate::SlotIndex;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

/// A triple buffer of raw byte blocks
///
/// This is the untyped flavor of triple buffering: three blocks of
/// `block_size` bytes are shared between one producer, which fills a block and
/// publishes it, and one consumer, which picks up the latest published block.
/// Blocks published while the consumer was not looking are overwritten.
///
/// The producer and consumer sides are obtained by calling
/// [`split()`](Self::split), and can then be moved to separate threads.
///
/// ```
/// use tribuffer::RawTripleBuffer;
///
/// let (mut input, mut output) = RawTripleBuffer::new(4).split();
/// assert!(!output.is_update());
///
/// input.update(&[1, 2, 3, 4]).unwrap();
/// assert!(output.is_update());
/// assert_eq!(output.read_buffer(), Some(&[1, 2, 3, 4][..]));
/// assert_eq!(output.read_buffer(), None);
/// ```
pub struct RawTripleBuffer<A: BlockAllocator = HeapAllocator> {
    input: RawInput<A>,
    output: RawOutput<A>,
}
//
impl RawTripleBuffer {
    /// Construct a triple buffer of `block_size`-byte blocks on the heap
    ///
    /// Oversized updates are truncated, see [`Config`] for other options.
    ///
    /// # Panics
    ///
    /// If `block_size` exceeds `isize::MAX`.
    pub fn new(block_size: usize) -> Self {
        Self::with_allocator(block_size, HeapAllocator)
    }

    /// Construct a triple buffer on the heap with a custom configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Self::with_config_in(config, HeapAllocator)
    }
}
//
impl<A: BlockAllocator> RawTripleBuffer<A> {
    /// Construct a triple buffer of `block_size`-byte blocks, obtained from
    /// `allocator`
    ///
    /// # Panics
    ///
    /// If `block_size` exceeds `isize::MAX`. If the allocator fails, the
    /// global allocation error handler is called.
    pub fn with_allocator(block_size: usize, allocator: A) -> Self {
        let Ok(layout) = Config::new(block_size).layout() else {
            panic!("triple buffer block size {block_size} is too large");
        };
        Self::from_storage(
            SlotStorage::new_or_abort(layout, allocator),
            OversizePolicy::default(),
        )
    }

    /// Construct a triple buffer with a custom configuration and allocator
    pub fn with_config_in(config: Config, allocator: A) -> Result<Self> {
        let storage = SlotStorage::new(config.layout()?, allocator)?;
        Ok(Self::from_storage(storage, config.oversize))
    }

    /// Set up a triple buffer with a custom block layout
    pub(crate) fn with_layout(layout: Layout, allocator: A) -> Self {
        Self::from_storage(
            SlotStorage::new_or_abort(layout, allocator),
            OversizePolicy::default(),
        )
    }

    fn from_storage(storage: SlotStorage<A>, oversize: OversizePolicy) -> Self {
        let shared = Arc::new(SharedState {
            roles: RoleState::new(),
            storage,
            oversize,
        });
        Self {
            input: RawInput {
                shared: shared.clone(),
            },
            output: RawOutput { shared },
        }
    }

    /// Size of each block, in bytes
    pub fn block_size(&self) -> usize {
        self.input.block_size()
    }

    /// Pointer to the block of any slot, for in-crate initialization while
    /// nobody else can see the buffer
    pub(crate) fn slot_block(&mut self, slot: SlotIndex) -> NonNull<u8> {
        self.input.shared.storage.block(slot)
    }

    /// Extract the producer and consumer sides of the triple buffer
    pub fn split(self) -> (RawInput<A>, RawOutput<A>) {
        (self.input, self.output)
    }
}
//
impl<A: BlockAllocator> fmt::Debug for RawTripleBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTripleBuffer")
            .field("block_size", &self.block_size())
            .field("roles", &self.input.shared.roles)
            .finish_non_exhaustive()
    }
}

/// Producer side of a raw triple buffer
///
/// Updates never block: in the worst case, a collision with the consumer
/// costs a retry of the role rotation.
pub struct RawInput<A: BlockAllocator = HeapAllocator> {
    shared: Arc<SharedState<A>>,
}
//
impl<A: BlockAllocator> RawInput<A> {
    /// Size of each block, in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.shared.storage.block_size()
    }

    /// Policy applied by [`update()`](Self::update) to oversized payloads
    pub fn oversize_policy(&self) -> OversizePolicy {
        self.shared.oversize
    }

    /// Start of the current write block
    #[inline]
    pub(crate) fn write_block(&self) -> NonNull<u8> {
        let shared = &*self.shared;
        shared.storage.block(shared.roles.write_slot())
    }

    /// Access the current write block
    ///
    /// The block holds whatever was last written into this slot. Call
    /// [`publish()`](Self::publish) to make the changes visible to the consumer.
    pub fn write_buffer(&mut self) -> &mut [u8] {
        // SAFETY: the write block is never accessed by the consumer, and the
        //         &mut borrow of self prevents any other access on our side.
        //         Blocks are zero-initialized on allocation.
        unsafe { slice::from_raw_parts_mut(self.write_block().as_ptr(), self.block_size()) }
    }

    /// Publish the current write block as the newest value
    ///
    /// If the consumer did not pick up the previously published value, it is
    /// discarded.
    pub fn publish(&mut self) {
        self.shared.roles.publish();
    }

    /// Copy `bytes` into the write block and publish it
    ///
    /// Returns the number of bytes copied. If `bytes` is longer than a block,
    /// the outcome depends on the [`OversizePolicy`]: either the first
    /// `block_size` bytes are published, or [`Error::Oversized`] is returned
    /// and nothing is published.
    pub fn update(&mut self, bytes: &[u8]) -> Result<usize> {
        let capacity = self.block_size();
        if bytes.len() > capacity {
            match self.shared.oversize {
                OversizePolicy::Truncate => {
                    log::debug!("truncating {} byte payload to {capacity} bytes", bytes.len());
                }
                OversizePolicy::Reject => {
                    log::warn!("rejecting {} byte payload ({capacity} byte blocks)", bytes.len());
                    return Err(Error::Oversized {
                        len: bytes.len(),
                        capacity,
                    });
                }
            }
        }
        let len = bytes.len().min(capacity);
        self.write_buffer()[..len].copy_from_slice(&bytes[..len]);
        self.publish();
        Ok(len)
    }

    /// Build the next value in place and publish it if `fill` says so
    ///
    /// `fill` receives the whole write block. If it returns `true`, the block
    /// is published and `true` is returned. Otherwise nothing is published:
    /// whatever `fill` wrote stays in the write block as scratch data, which
    /// later updates start from.
    pub fn update_with<F>(&mut self, fill: F) -> bool
    where
        F: FnOnce(&mut [u8]) -> bool,
    {
        if fill(self.write_buffer()) {
            self.publish();
            true
        } else {
            false
        }
    }
}
//
impl<A: BlockAllocator> fmt::Debug for RawInput<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawInput")
            .field("block_size", &self.block_size())
            .field("write_slot", &self.shared.roles.write_slot())
            .finish_non_exhaustive()
    }
}

/// Consumer side of a raw triple buffer
///
/// Readout never blocks. It either returns the latest published block or
/// reports that nothing new was published since the last readout.
pub struct RawOutput<A: BlockAllocator = HeapAllocator> {
    shared: Arc<SharedState<A>>,
}
//
impl<A: BlockAllocator> RawOutput<A> {
    /// Size of each block, in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.shared.storage.block_size()
    }

    /// Tell whether a value was published since the last readout
    #[inline]
    pub fn is_update(&self) -> bool {
        self.shared.roles.is_dirty()
    }

    /// Take ownership of the latest published block, if any
    #[inline]
    pub(crate) fn consume_block(&mut self) -> Option<NonNull<u8>> {
        let shared = &*self.shared;
        let slot = shared.roles.consume()?;
        Some(shared.storage.block(slot))
    }

    /// Access the latest published block, if it was not read already
    ///
    /// The returned block stays untouched by the producer for as long as it
    /// is borrowed, which lasts until the next call to a method of `self`.
    /// Two calls without a publish in between yield the block once, then
    /// `None`.
    pub fn read_buffer(&mut self) -> Option<&[u8]> {
        let block = self.consume_block()?;
        // SAFETY: the read block is never accessed by the producer, and it
        //         stays in the read role until our next consume(), which
        //         requires &mut self.
        Some(unsafe { slice::from_raw_parts(block.as_ptr(), self.block_size()) })
    }

    /// Run `inspect` on the latest published block, if it was not read already
    ///
    /// Returns `true` if `inspect` ran, `false` if there was nothing new.
    pub fn read<F>(&mut self, inspect: F) -> bool
    where
        F: FnOnce(&[u8]),
    {
        match self.read_buffer() {
            Some(block) => {
                inspect(block);
                true
            }
            None => false,
        }
    }
}
//
impl<A: BlockAllocator> fmt::Debug for RawOutput<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawOutput")
            .field("block_size", &self.block_size())
            .field("read_slot", &self.shared.roles.read_slot())
            .field("dirty", &self.is_update())
            .finish_non_exhaustive()
    }
}

/// State shared by the producer and consumer of a triple buffer
///
/// - Three memory blocks, one per slot
/// - The role word telling which block is written, retained or read
/// - The policy for oversized updates
struct SharedState<A: BlockAllocator> {
    roles: RoleState,
    storage: SlotStorage<A>,
    oversize: OversizePolicy,
}
//
impl<A: BlockAllocator> SharedState<A> {
    /// Copy of the bytes of every slot, in slot order
    ///
    /// Only meaningful while nobody is accessing the buffer.
    #[cfg(test)]
    fn snapshot(&self) -> Vec<Vec<u8>> {
        (0..3)
            .map(|slot| {
                let block = self.storage.block(slot);
                let mut bytes = vec![0; self.storage.block_size()];
                // SAFETY: test-only, no concurrent access
                unsafe {
                    std::ptr::copy_nonoverlapping(block.as_ptr(), bytes.as_mut_ptr(), bytes.len())
                };
                bytes
            })
            .collect()
    }
}
