//! Triple buffer of values of a single type

use crate::policy::{self, Slotted};
use crate::raw::{RawInput, RawOutput, RawTripleBuffer};
use crate::storage::{BlockAllocator, HeapAllocator};
use std::alloc::Layout;
use std::any;
use std::fmt;
use std::marker::PhantomData;

/// A triple buffer holding values of type `T`
///
/// Each of the three slots holds a `T`, which starts out as `T::default()`.
/// Values are copied in and out according to the [copy policy](Slotted) of
/// `T`, so that they can be exchanged by reference without allocating.
///
/// ```
/// use tribuffer::TypedTripleBuffer;
///
/// #[derive(Clone, Copy, Debug, Default, PartialEq)]
/// struct Snapshot {
///     temperature: f32,
///     sequence: u32,
/// }
///
/// let (mut input, mut output) = TypedTripleBuffer::<Snapshot>::new().split();
///
/// let mut latest = Snapshot::default();
/// assert!(!output.fetch(&mut latest));
///
/// input.put(&Snapshot { temperature: 21.5, sequence: 1 });
/// assert!(output.fetch(&mut latest));
/// assert_eq!(latest, Snapshot { temperature: 21.5, sequence: 1 });
/// ```
pub struct TypedTripleBuffer<T: Slotted, A: BlockAllocator = HeapAllocator> {
    raw: RawTripleBuffer<A>,
    value: PhantomData<T>,
}
//
impl<T: Slotted> TypedTripleBuffer<T> {
    /// Construct a triple buffer of default values on the heap
    pub fn new() -> Self {
        Self::with_allocator(HeapAllocator)
    }
}
//
impl<T: Slotted, A: BlockAllocator> TypedTripleBuffer<T, A> {
    /// Construct a triple buffer of default values, with slots obtained from
    /// `allocator`
    ///
    /// If the allocator fails, the global allocation error handler is called.
    pub fn with_allocator(allocator: A) -> Self {
        log::debug!(
            "setting up triple buffer of {} ({:?} policy)",
            any::type_name::<T>(),
            policy::strategy_of::<T>()
        );
        let mut raw = RawTripleBuffer::with_layout(Layout::new::<T>(), allocator);
        for slot in 0..3 {
            // SAFETY: the block is laid out for a T, and no one else can
            //         access it before the buffer is split
            unsafe { raw.slot_block(slot).cast::<T>().as_ptr().write(T::default()) };
        }
        Self {
            raw,
            value: PhantomData,
        }
    }

    /// Extract the producer and consumer sides of the triple buffer
    pub fn split(self) -> (TypedInput<T, A>, TypedOutput<T, A>) {
        let (input, output) = self.raw.split();
        (
            TypedInput {
                raw: input,
                value: PhantomData,
            },
            TypedOutput {
                raw: output,
                value: PhantomData,
            },
        )
    }
}
//
impl<T: Slotted> Default for TypedTripleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
//
impl<T: Slotted, A: BlockAllocator> fmt::Debug for TypedTripleBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedTripleBuffer")
            .field("type", &any::type_name::<T>())
            .field("raw", &self.raw)
            .finish()
    }
}

/// Producer side of a typed triple buffer
pub struct TypedInput<T: Slotted, A: BlockAllocator = HeapAllocator> {
    raw: RawInput<A>,
    value: PhantomData<T>,
}
//
impl<T: Slotted, A: BlockAllocator> TypedInput<T, A> {
    /// Copy `value` into the write slot and publish it
    pub fn put(&mut self, value: &T) {
        policy::copy_value(self.write_buffer(), value);
        self.publish();
    }

    /// Access the value in the write slot
    ///
    /// This is the last value written into that slot, which is not
    /// necessarily the last published value. Call
    /// [`publish()`](Self::publish) once done modifying it.
    pub fn write_buffer(&mut self) -> &mut T {
        // SAFETY: the write slot holds an initialized T that only the producer
        //         may access, and &mut self excludes any other access
        unsafe { &mut *self.raw.write_block().cast::<T>().as_ptr() }
    }

    /// Publish the value in the write slot
    pub fn publish(&mut self) {
        self.raw.publish();
    }

    /// Modify the value in the write slot and publish it if `modify` says so
    ///
    /// Returns the verdict of `modify`.
    pub fn update_with<F>(&mut self, modify: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        if modify(self.write_buffer()) {
            self.publish();
            true
        } else {
            false
        }
    }
}
//
impl<T: Slotted, A: BlockAllocator> fmt::Debug for TypedInput<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedInput")
            .field("type", &any::type_name::<T>())
            .field("raw", &self.raw)
            .finish()
    }
}

/// Consumer side of a typed triple buffer
pub struct TypedOutput<T: Slotted, A: BlockAllocator = HeapAllocator> {
    raw: RawOutput<A>,
    value: PhantomData<T>,
}
//
impl<T: Slotted, A: BlockAllocator> TypedOutput<T, A> {
    /// Tell whether a value was published since the last readout
    #[inline]
    pub fn is_update(&self) -> bool {
        self.raw.is_update()
    }

    /// Copy the latest published value into `out`, if it was not read already
    ///
    /// Returns `false` and leaves `out` alone if there is nothing new.
    pub fn fetch(&mut self, out: &mut T) -> bool {
        match self.read_buffer() {
            Some(value) => {
                policy::copy_value(out, value);
                true
            }
            None => false,
        }
    }

    /// Access the latest published value, if it was not read already
    ///
    /// The value stays untouched by the producer for as long as it is
    /// borrowed.
    pub fn read_buffer(&mut self) -> Option<&T> {
        let block = self.raw.consume_block()?;
        // SAFETY: the read slot holds an initialized T that the producer does
        //         not access until our next consume, which needs &mut self
        Some(unsafe { &*block.cast::<T>().as_ptr() })
    }

    /// Run `inspect` on the latest published value, if it was not read already
    ///
    /// Returns `true` if `inspect` ran.
    pub fn read<F>(&mut self, inspect: F) -> bool
    where
        F: FnOnce(&T),
    {
        match self.read_buffer() {
            Some(value) => {
                inspect(value);
                true
            }
            None => false,
        }
    }
}
//
impl<T: Slotted, A: BlockAllocator> fmt::Debug for TypedOutput<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedOutput")
            .field("type", &any::type_name::<T>())
            .field("raw", &self.raw)
            .finish()
    }
}
