//! Role state of a triple buffer
//!
//! The three slots of a triple buffer rotate through three roles. One slot is
//! being filled by the writer, one holds the latest published value, and one
//! is being looked at by the reader. All of this, plus a flag telling whether
//! the published value has been seen yet, fits in a single atomic word:
//!
//! ```text
//!  bit   8       7 6       5 4        3 2     1 0
//!      [dirty] [write] [retained] [read] [reserved]
//! ```
//!
//! The word only ever changes through [`RoleState::publish`] and
//! [`RoleState::consume`], each of which is a compare-and-swap loop around a
//! pure function of the previous word.

use crate::SlotIndex;
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Raw role word
pub(crate) type RoleWord = u32;

const WRITE_SHIFT: u32 = 6;
const RETAINED_SHIFT: u32 = 4;
const READ_SHIFT: u32 = 2;

const WRITE_MASK: RoleWord = 0b11 << WRITE_SHIFT;
const RETAINED_MASK: RoleWord = 0b11 << RETAINED_SHIFT;
const READ_MASK: RoleWord = 0b11 << READ_SHIFT;
const RESERVED_MASK: RoleWord = 0b11;
const DIRTY_MASK: RoleWord = 1 << 8;

/// Write = slot 0, retained = slot 1, read = slot 2, clean
const INITIAL_WORD: RoleWord = 0x1b;

/// Move the write slot to the retained role and vice versa, mark dirty
const fn publish_transition(word: RoleWord) -> RoleWord {
    DIRTY_MASK
        | ((word & WRITE_MASK) >> (WRITE_SHIFT - RETAINED_SHIFT))
        | ((word & RETAINED_MASK) << (WRITE_SHIFT - RETAINED_SHIFT))
        | (word & READ_MASK)
        | (word & RESERVED_MASK)
}

/// Move the retained slot to the read role and vice versa, mark clean
const fn consume_transition(word: RoleWord) -> RoleWord {
    (word & WRITE_MASK)
        | ((word & RETAINED_MASK) >> (RETAINED_SHIFT - READ_SHIFT))
        | ((word & READ_MASK) << (RETAINED_SHIFT - READ_SHIFT))
        | (word & RESERVED_MASK)
}

/// Decoded view of a role word
///
/// This is a snapshot: by the time it is inspected, the other side of the
/// buffer may already have rotated roles again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roles {
    /// Slot currently owned by the writer
    pub write: SlotIndex,

    /// Slot holding the latest published value
    pub retained: SlotIndex,

    /// Slot currently owned by the reader
    pub read: SlotIndex,

    /// Whether the retained slot holds a value the reader has not consumed
    pub dirty: bool,
}
//
impl Roles {
    fn decode(word: RoleWord) -> Self {
        Self {
            write: ((word & WRITE_MASK) >> WRITE_SHIFT) as SlotIndex,
            retained: ((word & RETAINED_MASK) >> RETAINED_SHIFT) as SlotIndex,
            read: ((word & READ_MASK) >> READ_SHIFT) as SlotIndex,
            dirty: word & DIRTY_MASK != 0,
        }
    }
}

/// Atomic role assignment of the three slots of a triple buffer
///
/// Only one writer may call [`publish()`](Self::publish) and only one reader
/// may call [`consume()`](Self::consume). Under that contract, the write slot
/// only changes on publish and the read slot only changes on consume, so each
/// side can trust its own slot index between two of its own transitions.
pub struct RoleState {
    word: CachePadded<AtomicU32>,
}
//
impl RoleState {
    /// Set up the initial role assignment (write=0, retained=1, read=2, clean)
    pub fn new() -> Self {
        Self {
            word: CachePadded::new(AtomicU32::new(INITIAL_WORD)),
        }
    }

    /// Index of the slot currently in the write role
    #[inline]
    pub fn write_slot(&self) -> SlotIndex {
        ((self.word.load(Ordering::Acquire) & WRITE_MASK) >> WRITE_SHIFT) as SlotIndex
    }

    /// Index of the slot currently in the read role
    #[inline]
    pub fn read_slot(&self) -> SlotIndex {
        ((self.word.load(Ordering::Acquire) & READ_MASK) >> READ_SHIFT) as SlotIndex
    }

    /// Index of the slot currently in the retained role
    #[inline]
    pub fn retained_slot(&self) -> SlotIndex {
        ((self.word.load(Ordering::Acquire) & RETAINED_MASK) >> RETAINED_SHIFT) as SlotIndex
    }

    /// Truth that a published value is waiting to be consumed
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.word.load(Ordering::Acquire) & DIRTY_MASK != 0
    }

    /// Snapshot of the full role assignment
    pub fn roles(&self) -> Roles {
        Roles::decode(self.word.load(Ordering::Acquire))
    }

    /// Commit the write slot as the newest value
    ///
    /// The former write slot becomes the retained slot and the writer gets the
    /// former retained slot to write into next. Any value that was retained
    /// but never consumed is thereby given back to the writer and lost.
    ///
    /// Returns the index of the new write slot.
    pub fn publish(&self) -> SlotIndex {
        let new_word = self.transition(publish_transition);
        ((new_word & WRITE_MASK) >> WRITE_SHIFT) as SlotIndex
    }

    /// Take the latest published value, if any
    ///
    /// Returns `None` without touching the role word if nothing was published
    /// since the last consume. Otherwise the retained slot becomes the read
    /// slot, the former read slot is handed back as the retained slot, and the
    /// index of the new read slot is returned.
    pub fn consume(&self) -> Option<SlotIndex> {
        if !self.is_dirty() {
            return None;
        }

        // Only the reader clears the dirty flag, so it stays set from here on
        let new_word = self.transition(consume_transition);
        Some(((new_word & READ_MASK) >> READ_SHIFT) as SlotIndex)
    }

    /// Apply a role transition atomically, returning the new word
    fn transition(&self, exchange: fn(RoleWord) -> RoleWord) -> RoleWord {
        let backoff = Backoff::new();
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = exchange(current);
            // Release publishes the slot contents written before this call,
            // Acquire makes the other side's last slot accesses visible to us.
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    log::trace!("role word {current:#05x} -> {next:#05x}");
                    return next;
                }
                Err(actual) => {
                    current = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Raw role word, for tests that check bit-level behaviour
    #[cfg(test)]
    pub(crate) fn word(&self) -> RoleWord {
        self.word.load(Ordering::Relaxed)
    }
}
//
impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}
//
impl fmt::Debug for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoleState").field(&self.roles()).finish()
    }
}
