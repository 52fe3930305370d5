//! Error type of the crate

use thiserror::Error;

/// Things that can go wrong when setting up or updating a triple buffer
///
/// Finding no new data on the reader side is not an error. It is reported as
/// `None` or `false` by the relevant read operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A payload did not fit in a block and the buffer rejects oversized input
    #[error("payload of {len} bytes exceeds the {capacity} byte block size")]
    Oversized {
        /// Length of the payload
        len: usize,
        /// Block size of the buffer
        capacity: usize,
    },

    /// Block size and alignment do not describe a valid memory layout
    #[error("invalid block layout (size {size}, alignment {align})")]
    InvalidLayout {
        /// Requested block size
        size: usize,
        /// Requested block alignment
        align: usize,
    },

    /// The block allocator could not provide memory for a slot
    #[error("failed to allocate slot {slot} (size {size}, alignment {align})")]
    AllocationFailed {
        /// Slot whose block could not be allocated
        slot: usize,
        /// Requested block size
        size: usize,
        /// Requested block alignment
        align: usize,
    },
}

/// Result type of fallible triple buffer operations
pub type Result<T> = std::result::Result<T, Error>;
