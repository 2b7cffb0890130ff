/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Fixed arena of block-sized, block-aligned buffer slots.
//!
//! # Safety model
//!
//! The kernel writes to slot buffers via DMA, which is invisible to the Rust
//! compiler. To avoid aliasing UB we **never** form `&[u8]` or `&mut [u8]`
//! references to the backing allocation while any IO is in-flight. Instead we:
//!
//! 1. Obtain the base raw pointer (`*mut u8`) **once** at construction — before
//!    any IO is submitted — and store it for later use.
//! 2. Hand raw pointers to the submission path for kernel DMA targets.
//! 3. Only materialise `&[u8]` slices via [`std::slice::from_raw_parts`] for
//!    slots whose state is `Completed` (kernel has finished writing).
//!
//! Slot lifecycle: `Free → InFlight → Completed → Free`. Each checkout is
//! single-use; there is no transition back.
//!
//! A slot is addressed from the outside only through a [`ReadToken`] carrying
//! the slot index and a generation counter. The generation is bumped every time
//! the slot returns to `Free`, so a stale or corrupted completion record can be
//! recognized and discarded instead of being resolved into memory that has been
//! handed to someone else.

use std::collections::VecDeque;

use crate::error::{RingError, RingResult};
use crate::num::PowerOfTwo;
use crate::pool::AlignedBytes;

/// Opaque handle to an in-flight or completed block read.
///
/// Packs into the 64-bit user-context tag carried by the kernel's completion
/// record: low 32 bits slot index, high 32 bits generation. Tokens are normally
/// issued by [`BlockPool::check_out`]; the public constructor exists for mock
/// readers in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadToken {
    slot: u32,
    generation: u32,
}

impl ReadToken {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Encode into the opaque `u64` attached to a submission.
    pub fn user_data(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.slot)
    }

    /// Decode from the opaque `u64` returned on the matching completion.
    pub fn from_user_data(user_data: u64) -> Self {
        Self {
            slot: user_data as u32,
            generation: (user_data >> 32) as u32,
        }
    }
}

/// State of each buffer slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotState {
    /// Slot is available for a new checkout.
    #[default]
    Free,
    /// Checked out for a submission. Kernel may be DMA-ing.
    InFlight,
    /// Completion observed — data is ready. Safe to create `&[u8]`.
    Completed,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    state: SlotState,
    generation: u32,
    /// Byte offset of the in-flight read, recorded at checkout.
    offset: u64,
    /// Valid bytes in the slot, recorded at completion.
    bytes_read: usize,
}

/// Fixed pool of block-sized buffer slots inside one pinned aligned allocation.
///
/// Memory use is bounded to `queue_depth × block_size` and nothing is allocated
/// after construction. Every slot base address is a multiple of the block size,
/// and addresses never move while a request referencing them is outstanding.
pub struct BlockPool {
    /// Owns the aligned allocation. **Must not be dereferenced** while any IO is
    /// in-flight — see the module-level safety discussion.
    _bytes: AlignedBytes,
    /// Raw pointer to the start of the buffer, obtained once at construction.
    /// All subsequent slot access goes through pointer arithmetic on this base.
    base: *mut u8,
    block_size: usize,
    slots: Vec<Slot>,
    /// FIFO free-list for O(1) slot allocation.
    free: VecDeque<usize>,
    /// Number of slots checked out but not yet completed or failed.
    in_flight: usize,
}

// SAFETY: The raw pointer `base` is derived from an owned allocation (`_bytes`)
// and is never shared — all mutable access requires `&mut self`.
unsafe impl Send for BlockPool {}
// SAFETY: `&self` methods only access completed slot data (kernel has finished
// writing). All mutation requires `&mut self`.
unsafe impl Sync for BlockPool {}

impl BlockPool {
    /// Create a pool of `queue_depth` slots of `block_size` bytes each, aligned
    /// to the block size.
    pub fn new(queue_depth: usize, block_size: PowerOfTwo) -> RingResult<Self> {
        let capacity = queue_depth.checked_mul(block_size.raw()).ok_or_else(|| {
            RingError::log_alloc_error(format_args!(
                "pool of {} slots of {} bytes overflows usize",
                queue_depth,
                block_size.raw()
            ))
        })?;

        let mut bytes = AlignedBytes::new(capacity, block_size)?;

        // SAFETY: No IOs are in-flight yet, so taking the base pointer is sound.
        // We extract it here and never form a reference to the region again.
        let base: *mut u8 = bytes.as_mut_ptr();

        Ok(Self {
            _bytes: bytes,
            base,
            block_size: block_size.raw(),
            slots: vec![Slot::default(); queue_depth],
            free: (0..queue_depth).collect(),
            in_flight: 0,
        })
    }

    /// Check a free slot out for a read at `offset`. The slot transitions to
    /// `InFlight` and its buffer belongs to the kernel until
    /// [`complete`](Self::complete) or [`fail`](Self::fail) is called.
    ///
    /// Returns `SubmissionError` when every slot is outstanding — capacity bounds
    /// the number of simultaneous requests.
    pub fn check_out(&mut self, offset: u64) -> RingResult<ReadToken> {
        let index = self.free.pop_front().ok_or_else(|| {
            RingError::message(
                crate::error::RingErrorKind::SubmissionError,
                format!("no free buffer slots (queue_depth={})", self.slots.len()),
            )
        })?;
        debug_assert_eq!(self.slots[index].state, SlotState::Free);

        let slot = &mut self.slots[index];
        slot.state = SlotState::InFlight;
        slot.offset = offset;
        slot.bytes_read = 0;
        self.in_flight += 1;

        Ok(ReadToken::new(index as u32, slot.generation))
    }

    /// Raw pointer to the slot buffer, for handing to the kernel. Only valid for
    /// `InFlight` slots; no reference to the backing buffer is formed.
    pub fn slot_ptr(&mut self, token: ReadToken) -> RingResult<*mut u8> {
        let index = self.live_index(token)?;
        if self.slots[index].state != SlotState::InFlight {
            return Err(RingError::log_invalid_operation(format_args!(
                "slot {} is not in flight (state: {:?})",
                index, self.slots[index].state
            )));
        }
        // Raw pointer arithmetic — no reference to the backing buffer.
        Ok(unsafe { self.base.add(index * self.block_size) })
    }

    /// Resolve the opaque user-context tag of a completion record back to the
    /// originating token.
    ///
    /// Returns `StaleCompletion` when the slot index is out of range or the
    /// generation does not match — such a record is discarded rather than cast
    /// into a buffer.
    pub fn resolve(&self, user_data: u64) -> RingResult<ReadToken> {
        let token = ReadToken::from_user_data(user_data);
        let index = self.live_index(token)?;
        if self.slots[index].state != SlotState::InFlight {
            return Err(RingError::log_stale_completion(format_args!(
                "completion for slot {} arrived in state {:?}",
                index, self.slots[index].state
            )));
        }
        Ok(token)
    }

    /// Record a successful completion: the kernel wrote `bytes_read` valid bytes
    /// (possibly zero, possibly less than a block at end-of-file).
    pub fn complete(&mut self, token: ReadToken, bytes_read: usize) -> RingResult<()> {
        let index = self.expect_state(token, SlotState::InFlight)?;
        if bytes_read > self.block_size {
            return Err(RingError::log_invalid_operation(format_args!(
                "completion of {} bytes exceeds the block size {}",
                bytes_read, self.block_size
            )));
        }
        let slot = &mut self.slots[index];
        slot.state = SlotState::Completed;
        slot.bytes_read = bytes_read;
        self.in_flight -= 1;
        Ok(())
    }

    /// Record a failed completion (or a push that never reached the kernel). The
    /// slot returns straight to `Free`; its contents are undefined and the token
    /// is invalidated.
    pub fn fail(&mut self, token: ReadToken) -> RingResult<()> {
        let index = self.expect_state(token, SlotState::InFlight)?;
        self.in_flight -= 1;
        self.recycle(index);
        Ok(())
    }

    /// Borrow the valid bytes of a completed slot: exactly `bytes_read` bytes,
    /// which may be fewer than one block at end-of-file.
    pub fn data(&self, token: ReadToken) -> RingResult<&[u8]> {
        let index = self.expect_state(token, SlotState::Completed)?;
        let len = self.slots[index].bytes_read;
        // SAFETY: The slot is Completed — the kernel has finished writing.
        // `base` was derived from a valid, aligned allocation that outlives
        // `self`, and `len <= block_size` keeps the slice within the slot.
        Ok(unsafe { std::slice::from_raw_parts(self.base.add(index * self.block_size), len) })
    }

    /// Byte offset the slot was checked out for.
    pub fn offset(&self, token: ReadToken) -> RingResult<u64> {
        let index = self.live_index(token)?;
        Ok(self.slots[index].offset)
    }

    /// Return a completed slot to the free-list and invalidate its token.
    pub fn release(&mut self, token: ReadToken) -> RingResult<()> {
        let index = self.expect_state(token, SlotState::Completed)?;
        self.recycle(index);
        Ok(())
    }

    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    /// Number of checked-out slots whose completion has not been recorded.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queue_depth(&self) -> usize {
        self.slots.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn recycle(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(index);
    }

    /// Bounds- and generation-check a token, returning its slot index.
    fn live_index(&self, token: ReadToken) -> RingResult<usize> {
        let index = token.slot() as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == token.generation() => Ok(index),
            _ => Err(RingError::log_stale_completion(format_args!(
                "token (slot {}, generation {}) does not match any live request",
                token.slot(),
                token.generation()
            ))),
        }
    }

    fn expect_state(&self, token: ReadToken, expected: SlotState) -> RingResult<usize> {
        let index = self.live_index(token)?;
        if self.slots[index].state != expected {
            return Err(RingError::log_invalid_operation(format_args!(
                "slot {} is {:?}, expected {:?}",
                index, self.slots[index].state, expected
            )));
        }
        Ok(index)
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("queue_depth", &self.slots.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RingErrorKind;

    const BLOCK: usize = 1024;

    fn make_pool(depth: usize) -> BlockPool {
        BlockPool::new(depth, PowerOfTwo::new(BLOCK).unwrap()).unwrap()
    }

    #[test]
    fn token_user_data_round_trip() {
        let token = ReadToken::new(3, 7);
        assert_eq!(ReadToken::from_user_data(token.user_data()), token);
    }

    #[test]
    fn slot_addresses_are_block_aligned() {
        let mut pool = make_pool(4);
        for i in 0..4 {
            let token = pool.check_out((i * BLOCK) as u64).unwrap();
            let ptr = pool.slot_ptr(token).unwrap();
            assert_eq!(
                ptr as usize % BLOCK,
                0,
                "slot {} base is not a multiple of the block size",
                i
            );
        }
    }

    #[test]
    fn checkout_complete_release_round_trip() {
        let mut pool = make_pool(2);

        let token = pool.check_out(0).unwrap();
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.offset(token).unwrap(), 0);

        pool.complete(token, 11).unwrap();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.data(token).unwrap().len(), 11);

        pool.release(token).unwrap();
        assert!(pool.has_free_slot());
    }

    #[test]
    fn exhaustion_is_a_submission_error() {
        let mut pool = make_pool(2);
        pool.check_out(0).unwrap();
        pool.check_out(BLOCK as u64).unwrap();

        let err = pool.check_out(2 * BLOCK as u64).unwrap_err();
        assert_eq!(err.kind(), RingErrorKind::SubmissionError);
    }

    #[test]
    fn released_token_goes_stale() {
        let mut pool = make_pool(1);
        let token = pool.check_out(0).unwrap();
        pool.complete(token, BLOCK).unwrap();
        pool.release(token).unwrap();

        // The generation was bumped; the old token must not resolve.
        assert_eq!(
            pool.data(token).unwrap_err().kind(),
            RingErrorKind::StaleCompletion
        );
        assert_eq!(
            pool.resolve(token.user_data()).unwrap_err().kind(),
            RingErrorKind::StaleCompletion
        );

        // The recycled slot hands out a fresh generation.
        let fresh = pool.check_out(0).unwrap();
        assert_eq!(fresh.slot(), token.slot());
        assert_ne!(fresh.generation(), token.generation());
    }

    #[test]
    fn failed_slot_returns_to_free() {
        let mut pool = make_pool(1);
        let token = pool.check_out(0).unwrap();
        pool.fail(token).unwrap();
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.has_free_slot());
        assert_eq!(
            pool.data(token).unwrap_err().kind(),
            RingErrorKind::StaleCompletion
        );
    }

    #[test]
    fn data_before_completion_is_rejected() {
        let mut pool = make_pool(1);
        let token = pool.check_out(0).unwrap();
        assert_eq!(
            pool.data(token).unwrap_err().kind(),
            RingErrorKind::InvalidOperation
        );
    }

    #[test]
    fn oversized_completion_is_rejected() {
        let mut pool = make_pool(1);
        let token = pool.check_out(0).unwrap();
        assert_eq!(
            pool.complete(token, BLOCK + 1).unwrap_err().kind(),
            RingErrorKind::InvalidOperation
        );
    }

    #[test]
    fn resolve_out_of_range_slot_is_stale() {
        let pool = make_pool(1);
        let bogus = ReadToken::new(42, 0);
        assert_eq!(
            pool.resolve(bogus.user_data()).unwrap_err().kind(),
            RingErrorKind::StaleCompletion
        );
    }

    #[test]
    fn zero_byte_completion_is_a_success() {
        let mut pool = make_pool(1);
        let token = pool.check_out(1 << 20).unwrap();
        pool.complete(token, 0).unwrap();
        assert!(pool.data(token).unwrap().is_empty());
    }
}
