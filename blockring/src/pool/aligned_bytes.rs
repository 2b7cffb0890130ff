/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Aligned allocation for DMA-compatible read buffers.

use std::{
    alloc::Layout,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use crate::error::{RingError, RingResult};
use crate::num::PowerOfTwo;

/// An owned, zero-initialized byte allocation whose base address is aligned to a
/// caller-supplied power of two.
///
/// The asynchronous read path may bypass the page cache or hand the region to the
/// kernel for DMA, so the base address has to satisfy the device alignment. The
/// allocation is made once and never moves or grows for the lifetime of the value.
pub struct AlignedBytes {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBytes {
    /// Allocate `capacity` zeroed bytes aligned to `alignment`.
    ///
    /// `capacity` must be a multiple of `alignment` so the region can be split into
    /// alignment-preserving slots.
    ///
    /// # Error
    ///
    /// Returns `AlignmentError` when the capacity is not a multiple of the alignment
    /// and `AllocationError` when the underlying allocator cannot satisfy the
    /// request. Allocation failure is fatal to the calling request; there is no
    /// retry.
    pub fn new(capacity: usize, alignment: PowerOfTwo) -> RingResult<Self> {
        if capacity % alignment.raw() != 0 {
            return Err(RingError::log_alignment_error(format_args!(
                "capacity {} is not a multiple of alignment {}",
                capacity,
                alignment.raw()
            )));
        }

        let layout = Layout::from_size_align(capacity, alignment.raw())
            .map_err(RingError::log_alloc_error)?;

        if capacity == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
                layout,
            });
        }

        // SAFETY: The layout has non-zero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            RingError::log_alloc_error(format_args!(
                "allocation of {} bytes aligned to {} failed",
                capacity,
                alignment.raw()
            ))
        })?;

        Ok(Self {
            ptr,
            len: capacity,
            layout,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Base pointer handed to the kernel as a DMA target. While an asynchronous
    /// read is in flight the region must only be touched through this pointer,
    /// never through a slice borrow.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for AlignedBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: `ptr` covers `len` initialized (zeroed) bytes owned by `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBytes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: Same as `Deref`, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        if self.len != 0 {
            // SAFETY: `ptr` was allocated with exactly this layout.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
        }
    }
}

impl std::fmt::Debug for AlignedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBytes")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

// SAFETY: The allocation is exclusively owned; the raw pointer is never shared
// outside `self` and all mutation requires `&mut self`.
unsafe impl Send for AlignedBytes {}
// SAFETY: `&self` access is read-only over initialized memory.
unsafe impl Sync for AlignedBytes {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pow2(value: usize) -> PowerOfTwo {
        PowerOfTwo::new(value).unwrap()
    }

    #[test]
    fn create_aligned_bytes_works_512() {
        (0..100).for_each(|_| {
            let size = 4 * 512;
            let data = AlignedBytes::new(size, pow2(512)).unwrap();
            assert_eq!(data.len(), size, "Capacity should match");

            let ptr = data.as_ptr() as usize;
            assert_eq!(ptr % 512, 0, "Ptr should be aligned to 512");

            // assert that the region is zero-initialized.
            assert!(data.iter().all(|&b| b == 0));

            drop(data);
        });
    }

    #[test]
    fn create_aligned_bytes_works_4096() {
        let data = AlignedBytes::new(8 * 4096, pow2(4096)).unwrap();
        assert_eq!((data.as_ptr() as usize) % 4096, 0);
        assert_eq!(data.len(), 8 * 4096);
    }

    #[test]
    fn create_zero_length_allocation() {
        let x = AlignedBytes::new(0, pow2(16)).unwrap();
        assert_eq!(x.len(), 0);
        assert!(x.is_empty());
    }

    #[test]
    fn rejects_capacity_not_multiple_of_alignment() {
        let result = AlignedBytes::new(1000, pow2(512));
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            crate::error::RingErrorKind::AlignmentError
        );
    }

    #[test]
    fn mutation_round_trips() {
        let mut data = AlignedBytes::new(1024, pow2(1024)).unwrap();
        data[0] = 0xAB;
        data[1023] = 0xCD;
        assert_eq!(data[0], 0xAB);
        assert_eq!(data[1023], 0xCD);
    }
}
