//! Selection of the copy strategy used by typed triple buffers
//!
//! Values move in and out of a typed triple buffer by copy, never by move, so
//! the element type must be copyable in one of two ways:
//!
//! - `Copy` types are assigned directly ([`Assign`]).
//! - Types that are plain bytes but deliberately not `Copy` can implement the
//!   unsafe [`Plain`] marker and opt into a bitwise copy ([`RawCopy`]).
//!
//! The choice is made at the type level through [`Slotted`], so a type that
//! fits neither category is rejected when the program is compiled:
//!
//! ```compile_fail
//! let _ = tribuffer::TypedTripleBuffer::<String>::new();
//! ```
//!
//! The same goes for types that cannot be default-constructed:
//!
//! ```compile_fail
//! #[derive(Clone, Copy)]
//! struct Reading(f32);
//!
//! let _ = tribuffer::TypedTripleBuffer::<Reading>::new();
//! ```

use std::marker::PhantomData;
use std::mem;
use std::ptr;

/// Copy strategies, as reported by [`CopyPolicy::STRATEGY`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Plain assignment
    Assign,

    /// Bitwise copy of `size_of::<T>()` bytes
    RawCopy,
}

/// Way of copying a `T` into another `T`
pub trait CopyPolicy<T> {
    /// Strategy implemented by this policy
    const STRATEGY: Strategy;

    /// Overwrite `dst` with a copy of `src`
    fn copy(dst: &mut T, src: &T);
}

/// Copy policy of `Copy` types
#[derive(Debug)]
pub enum Assign {}
//
impl<T: Copy> CopyPolicy<T> for Assign {
    const STRATEGY: Strategy = Strategy::Assign;

    #[inline]
    fn copy(dst: &mut T, src: &T) {
        *dst = *src;
    }
}

/// Copy policy of [`Plain`] types
#[derive(Debug)]
pub enum RawCopy {}
//
impl<T: Plain> CopyPolicy<T> for RawCopy {
    const STRATEGY: Strategy = {
        #[allow(clippy::let_unit_value)]
        let () = NoDropGlue::<T>::ASSERT;
        Strategy::RawCopy
    };

    #[inline]
    fn copy(dst: &mut T, src: &T) {
        #[allow(clippy::let_unit_value)]
        let () = NoDropGlue::<T>::ASSERT;
        // SAFETY: Plain vouches that T can be duplicated bytewise, and it has
        //         no drop glue, so overwriting dst leaks nothing.
        unsafe { ptr::copy_nonoverlapping(src as *const T, dst as *mut T, 1) }
    }
}

/// Marker for types that may be duplicated by copying their bytes
///
/// # Safety
///
/// Implementors guarantee that a bitwise copy of a value is a valid,
/// independent value of the type. In practice, this means:
///
/// 1. No heap allocations or other owned resources (`Vec`, `Box`, `File`...)
/// 2. No drop glue (`std::mem::needs_drop::<Self>()` is false)
/// 3. No references or pointers whose uniqueness matters
///
/// The type could be `Copy`, but chooses not to be. Types with drop glue are
/// refused at compile time:
///
/// ```compile_fail
/// use tribuffer::{Plain, RawCopy, Slotted};
///
/// #[derive(Default)]
/// struct Samples(Vec<u8>);
///
/// unsafe impl Plain for Samples {}
///
/// impl Slotted for Samples {
///     type Policy = RawCopy;
/// }
///
/// let (mut input, _output) = tribuffer::TypedTripleBuffer::<Samples>::new().split();
/// input.put(&Samples(vec![1, 2, 3]));
/// ```
///
/// ```
/// use tribuffer::{Plain, RawCopy, Slotted};
///
/// #[derive(Default)]
/// #[repr(C)]
/// struct Pose {
///     position: [f64; 3],
///     orientation: [f64; 4],
///     stamp_ns: u64,
/// }
///
/// // SAFETY: just numbers
/// unsafe impl Plain for Pose {}
///
/// impl Slotted for Pose {
///     type Policy = RawCopy;
/// }
///
/// let (mut input, mut output) = tribuffer::TypedTripleBuffer::<Pose>::new().split();
/// input.put(&Pose { stamp_ns: 42, ..Default::default() });
/// assert_eq!(output.read_buffer().map(|pose| pose.stamp_ns), Some(42));
/// ```
pub unsafe trait Plain: Sized {}

/// Compile-time check that `T` can be overwritten without dropping it
struct NoDropGlue<T>(PhantomData<T>);
//
impl<T> NoDropGlue<T> {
    const ASSERT: () = assert!(!mem::needs_drop::<T>(), "Plain types must not need drop");
}

/// Types that can be stored in a typed triple buffer
///
/// Every `Copy + Default` type is `Slotted` with the [`Assign`] policy. Other
/// types must be [`Plain`] and implement this trait with the [`RawCopy`]
/// policy themselves.
pub trait Slotted: Default {
    /// How values are copied in and out of the buffer
    type Policy: CopyPolicy<Self>;
}
//
impl<T: Copy + Default> Slotted for T {
    type Policy = Assign;
}

/// Copy `src` into `dst` using the policy of `T`
#[inline]
pub(crate) fn copy_value<T: Slotted>(dst: &mut T, src: &T) {
    <T::Policy as CopyPolicy<T>>::copy(dst, src)
}

/// Strategy used for copying `T`
pub fn strategy_of<T: Slotted>() -> Strategy {
    <T::Policy as CopyPolicy<T>>::STRATEGY
}
