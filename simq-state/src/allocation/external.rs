//! Caller-supplied allocations

use num_complex::Complex64;
use std::ptr::NonNull;

/// A buffer provided and owned by the caller
///
/// The state calls [`length`](Self::length) to validate the allocation
/// before use, then [`materialize`](Self::materialize) once to obtain the
/// buffer. The implementor decides what dropping it means; the state simply
/// drops the object when it is done with the memory.
///
/// # Safety
///
/// Implementors must guarantee that the pointer returned by `materialize`:
/// - is aligned for `Complex64` and valid for reads and writes of
///   `length()` elements,
/// - stays valid and at the same address until the object is dropped,
/// - is not accessed by anything else in this process while the state
///   holds the object.
///
/// # Example
///
/// ```
/// use num_complex::Complex64;
/// use simq_state::{make_pure_state, AllocationSpec, ExternalAllocation};
/// use std::ptr::NonNull;
///
/// struct Pinned(Box<[Complex64]>);
///
/// unsafe impl ExternalAllocation for Pinned {
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn materialize(&mut self) -> NonNull<Complex64> {
///         NonNull::from(&mut self.0[0])
///     }
/// }
///
/// let memory = vec![Complex64::new(0.0, 0.0); 4].into_boxed_slice();
/// let state = make_pure_state(2, AllocationSpec::external(Pinned(memory))).unwrap();
/// assert!(state.original_is_pinned());
/// ```
pub unsafe trait ExternalAllocation: Send {
    /// Number of `Complex64` elements the allocation provides
    fn length(&self) -> usize;

    /// Base address of the buffer
    fn materialize(&mut self) -> NonNull<Complex64>;

    /// Whether outside consumers read this buffer at its fixed address
    ///
    /// Defaults to `true`: external memory is assumed to be observed by
    /// someone other than the state.
    fn is_pinned_address(&self) -> bool {
        true
    }
}
