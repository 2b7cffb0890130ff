/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Number types with limited dynamic range.

use std::num::NonZeroUsize;

use thiserror::Error;

/// A `usize` that is statically known to be a power of two.
///
/// Block sizes and buffer alignments are expressed through this type so that the
/// validity check happens once, at the configuration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PowerOfTwo(NonZeroUsize);

#[derive(Debug, Clone, Copy, Error)]
#[error("value {0} must be a power of two")]
pub struct NotPowerOfTwo(usize);

impl PowerOfTwo {
    /// Create a new `PowerOfTwo` if the given value is a power of two.
    pub const fn new(value: usize) -> Result<Self, NotPowerOfTwo> {
        let v = match NonZeroUsize::new(value) {
            Some(value) => value,
            None => return Err(NotPowerOfTwo(value)),
        };
        if v.is_power_of_two() {
            // Safety: We just checked.
            Ok(unsafe { Self::new_unchecked(v) })
        } else {
            Err(NotPowerOfTwo(value))
        }
    }

    /// Create a new `PowerOfTwo` without checking whether the value is a power of two.
    ///
    /// # Safety
    ///
    /// The value must be a power of two.
    pub const unsafe fn new_unchecked(value: NonZeroUsize) -> Self {
        Self(value)
    }

    /// Consume `self` and return the inner value.
    pub const fn into_inner(self) -> NonZeroUsize {
        self.0
    }

    /// Consume `self` and return the inner value as a `usize`.
    pub const fn raw(self) -> usize {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_powers_of_two() {
        for shift in 0..16 {
            let value = 1usize << shift;
            assert_eq!(PowerOfTwo::new(value).unwrap().raw(), value);
        }
    }

    #[test]
    fn rejects_zero() {
        assert!(PowerOfTwo::new(0).is_err());
    }

    #[test]
    fn rejects_non_powers() {
        for value in [3usize, 5, 6, 7, 12, 100, 1000, 4097] {
            assert!(PowerOfTwo::new(value).is_err(), "{} accepted", value);
        }
    }

    #[test]
    fn error_names_the_value() {
        let err = PowerOfTwo::new(12).unwrap_err();
        assert!(err.to_string().contains("12"));
    }
}
