//! Aligned, zero-initialized heap blocks for local state buffers

use crate::error::{Result, StateError};
use num_complex::Complex64;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Heap memory owned by a local buffer
///
/// Deallocated when dropped.
pub(crate) struct HeapBlock {
    data: NonNull<Complex64>,
    layout: Layout,
}

impl HeapBlock {
    /// Allocate `len` zeroed elements aligned to at least `alignment` bytes
    pub(crate) fn zeroed(len: usize, alignment: usize) -> Result<Self> {
        if len == 0 {
            return Err(StateError::MalformedState {
                length: 0,
                reason: "cannot allocate an empty state buffer",
            });
        }

        let size = len
            .checked_mul(std::mem::size_of::<Complex64>())
            .ok_or(StateError::AllocationError { size: usize::MAX })?;
        let align = alignment.max(std::mem::align_of::<Complex64>());
        let layout =
            Layout::from_size_align(size, align).map_err(|_| StateError::AllocationError { size })?;

        // All-zero bytes are `0.0 + 0.0i`.
        let ptr = unsafe { alloc_zeroed(layout) } as *mut Complex64;
        let data = NonNull::new(ptr).ok_or(StateError::AllocationError { size })?;

        Ok(Self { data, layout })
    }

    #[inline]
    pub(crate) fn as_non_null(&self) -> NonNull<Complex64> {
        self.data
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr() as *mut u8, self.layout);
        }
    }
}
