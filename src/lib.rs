//! Wait-free triple buffering of fixed-size blocks
//!
//! A triple buffer lets one producer thread hand the *latest* value of some
//! fixed-size data over to one consumer thread, without locks, without
//! blocking, and without the consumer ever seeing a half-written value. It is
//! meant for data where only the newest value matters, such as sensor
//! snapshots or periodically published state: if the consumer is slower than
//! the producer, it skips intermediate values rather than queueing them.
//!
//! Three memory blocks rotate through three roles. The producer owns the
//! *write* block, the consumer owns the *read* block, and the latest published
//! value waits in the *retained* block. Publishing swaps the write and
//! retained blocks, consuming swaps the retained and read blocks. Both swaps
//! are a compare-and-swap on a single atomic word, see [`RoleState`].
//!
//! Two flavors are provided:
//!
//! - [`RawTripleBuffer`] exchanges blocks of bytes of a size chosen at
//!   runtime, with memory obtained from a pluggable [`BlockAllocator`].
//! - [`TypedTripleBuffer`] exchanges values of a [`Slotted`] type, copied in
//!   and out according to a [`CopyPolicy`] picked at compile time.
//!
//! Either way, the buffer is [`split`](RawTripleBuffer::split) into a producer
//! half and a consumer half, which can be sent to their respective threads.
//! Neither half can be cloned, so there is exactly one producer and one
//! consumer.
//!
//! ```
//! use tribuffer::RawTripleBuffer;
//! use std::thread;
//!
//! let (mut input, mut output) = RawTripleBuffer::new(8).split();
//!
//! let producer = thread::spawn(move || {
//!     for tick in 1..=1000u64 {
//!         input.update(&tick.to_le_bytes()).unwrap();
//!     }
//! });
//!
//! // The consumer polls, and may miss some ticks
//! let mut last_tick = 0;
//! while last_tick < 1000 {
//!     output.read(|block| {
//!         let tick = u64::from_le_bytes(block.try_into().unwrap());
//!         assert!(tick > last_tick);
//!         last_tick = tick;
//!     });
//! }
//! producer.join().unwrap();
//! ```

#![deny(missing_debug_implementations)]
#![warn(missing_docs)]

mod config;
mod error;
mod policy;
mod raw;
mod state;
mod storage;
mod typed;

pub use crate::config::{Config, OversizePolicy};
pub use crate::error::{Error, Result};
pub use crate::policy::{strategy_of, Assign, CopyPolicy, Plain, RawCopy, Slotted, Strategy};
pub use crate::raw::{RawInput, RawOutput, RawTripleBuffer};
pub use crate::state::{RoleState, Roles};
pub use crate::storage::{BlockAllocator, HeapAllocator};
pub use crate::typed::{TypedInput, TypedOutput, TypedTripleBuffer};

/// Index of one of the three slots of a triple buffer (0, 1 or 2)
pub type SlotIndex = usize;

/// Model-based tests of the whole buffer
#[cfg(test)]
mod tests {
    use crate::RawTripleBuffer;
    use proptest::prelude::*;

    /// Something the producer or the consumer may do
    #[derive(Clone, Debug)]
    enum Op {
        Update(Vec<u8>),
        Abort(u8),
        Read,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..12).prop_map(Op::Update),
            any::<u8>().prop_map(Op::Abort),
            Just(Op::Read),
        ]
    }

    proptest! {
        /// The consumer sees exactly the latest unread published block,
        /// truncated to the block size, and each block at most once
        #[test]
        fn behaves_like_latest_value_cell(ops in prop::collection::vec(op(), 0..48)) {
            const BLOCK_SIZE: usize = 6;
            let (mut input, mut output) = RawTripleBuffer::new(BLOCK_SIZE).split();

            // Last published payload, if not read yet. Bytes past the payload
            // are leftovers from earlier writes to the same slot.
            let mut pending: Option<Vec<u8>> = None;
            for op in ops {
                match op {
                    Op::Update(bytes) => {
                        let len = bytes.len().min(BLOCK_SIZE);
                        prop_assert_eq!(input.update(&bytes), Ok(len));
                        pending = Some(bytes[..len].to_vec());
                    }
                    Op::Abort(fill) => {
                        let committed = input.update_with(|block| {
                            block.fill(fill);
                            false
                        });
                        prop_assert!(!committed);
                    }
                    Op::Read => {
                        prop_assert_eq!(output.is_update(), pending.is_some());
                        match (output.read_buffer(), pending.take()) {
                            (Some(block), Some(expected)) => {
                                prop_assert_eq!(block.len(), BLOCK_SIZE);
                                prop_assert_eq!(&block[..expected.len()], &expected[..]);
                            }
                            (None, None) => {}
                            (got, expected) => {
                                prop_assert!(false, "read {:?}, expected {:?}", got, expected);
                            }
                        }
                        prop_assert!(!output.is_update());
                    }
                }
            }
        }
    }
}
