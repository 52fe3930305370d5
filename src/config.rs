//! Construction parameters of raw triple buffers

use crate::error::{Error, Result};
use std::alloc::Layout;

/// What to do with a payload that is larger than the block size
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OversizePolicy {
    /// Copy the first `block_size` bytes and drop the rest
    #[default]
    Truncate,

    /// Refuse the update with [`Error::Oversized`], leaving the buffer as is
    Reject,
}

/// Block geometry and update behaviour of a raw triple buffer
///
/// ```
/// use tribuffer::{Config, OversizePolicy};
///
/// let config = Config::new(256).align(64).oversize(OversizePolicy::Reject);
/// assert_eq!(config.block_size, 256);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Size of each of the three blocks, in bytes
    pub block_size: usize,

    /// Alignment of each block, in bytes (a power of two)
    pub align: usize,

    /// Handling of payloads larger than `block_size`
    pub oversize: OversizePolicy,
}
//
impl Config {
    /// Byte-aligned blocks of `block_size` bytes, truncating oversized input
    pub const fn new(block_size: usize) -> Self {
        Self {
            block_size,
            align: 1,
            oversize: OversizePolicy::Truncate,
        }
    }

    /// Blocks laid out like a value of type `T`
    pub const fn for_type<T>() -> Self {
        Self {
            block_size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            oversize: OversizePolicy::Truncate,
        }
    }

    /// Change the block alignment
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Change the oversized payload policy
    pub const fn oversize(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }

    /// Memory layout of one block
    pub fn layout(&self) -> Result<Layout> {
        Layout::from_size_align(self.block_size, self.align).map_err(|_| Error::InvalidLayout {
            size: self.block_size,
            align: self.align,
        })
    }
}
//
impl Default for Config {
    /// A single-byte block
    fn default() -> Self {
        Self::new(1)
    }
}
