/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! io_uring-backed block reader with pooled aligned buffers.
//!
//! Submission pushes a read SQE tagged with a [`ReadToken`] and (optionally)
//! batches the submit syscall; completion reaps CQEs, resolves each tag through
//! the pool's generation check, and hands back [`Completion`] records. The pool
//! owns all buffer memory — the ring only ever carries token encodings, never
//! pointers in `user_data`.

use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io,
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    time::Duration,
};

use io_uring::IoUring;
use tracing::{debug, warn};

use crate::error::{RingError, RingResult};
use crate::pool::{BlockPool, ReadToken};
use crate::ring::config::RingConfig;
use crate::traits::{BlockReader, Completion};

/// Asynchronous single-file block reader over io_uring.
///
/// One logical thread of control drives the reader: all methods take
/// `&mut self`, and the kernel provides the asynchrony. The only suspension
/// point is [`wait`](Self::wait) / [`wait_timeout`](Self::wait_timeout);
/// submission may cross a syscall boundary but never blocks on data
/// availability.
///
/// Completions may arrive in any order relative to submission order;
/// correlation goes entirely through the token round-trip, never through
/// positional correlation.
pub struct UringBlockReader {
    ring: IoUring,
    pool: BlockPool,
    block_size: usize,
    /// Completions reaped from the CQ but not yet handed to the caller.
    ready: VecDeque<Completion>,
    /// Keep the file handle alive while the ring holds its registered fd.
    _file: File,
}

impl UringBlockReader {
    /// Open `file_path` read-only (with `O_DIRECT` if the config asks for it)
    /// and build a reader over it.
    pub fn open(file_path: &str, config: &RingConfig) -> RingResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        if config.direct_io {
            // Bypass the kernel page cache.
            // See: https://man7.org/linux/man-pages/man2/open.2.html
            options.custom_flags(libc::O_DIRECT);
        }
        let file = options.open(file_path).map_err(RingError::log_io_error)?;
        Self::with_file(file, config)
    }

    /// Build a reader over an already-open readable file handle.
    ///
    /// Opening (and the attendant existence/permission handling) is the
    /// caller's business; the reader only requires that the handle stays
    /// readable for its lifetime. The descriptor is registered with the ring
    /// as fixed file 0.
    pub fn with_file(file: File, config: &RingConfig) -> RingResult<Self> {
        let block_size = config.validate()?;

        let entries = config.queue_depth as u32;
        let ring = if let Some(idle_ms) = config.sqpoll_idle_ms {
            let mut builder = IoUring::builder();
            builder.setup_sqpoll(idle_ms);
            builder.build(entries)
        } else {
            IoUring::new(entries)
        }
        .map_err(RingError::log_io_error)?;

        let fd = file.as_raw_fd();
        ring.submitter()
            .register_files(std::slice::from_ref(&fd))
            .map_err(RingError::log_io_error)?;

        let pool = BlockPool::new(config.queue_depth, block_size)?;

        debug!(
            queue_depth = config.queue_depth,
            block_size = block_size.raw(),
            "block ring initialized"
        );

        Ok(Self {
            ring,
            pool,
            block_size: block_size.raw(),
            ready: VecDeque::new(),
            _file: file,
        })
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Push an asynchronous read of `block_number` into the submission queue
    /// without notifying the kernel. Returns the token identifying the request.
    ///
    /// Call [`flush`](Self::flush) after enqueuing a batch to submit them all
    /// in a single syscall, or use [`submit`](Self::submit) for one-shot use.
    pub fn enqueue(&mut self, block_number: u64) -> RingResult<ReadToken> {
        let offset = block_number
            .checked_mul(self.block_size as u64)
            .ok_or_else(|| {
                RingError::log_invalid_operation(format_args!(
                    "block number {} overflows the byte offset",
                    block_number
                ))
            })?;

        let token = self.pool.check_out(offset)?;
        let buf_ptr = self.pool.slot_ptr(token)?;

        let read_op = io_uring::opcode::Read::new(
            // 0 is the file descriptor registered with the ring via `register_files()`.
            io_uring::types::Fixed(0),
            buf_ptr,
            self.block_size as u32,
        )
        .offset(offset)
        .build()
        .user_data(token.user_data());

        // SAFETY: `buf_ptr` points into the pool's pinned, aligned allocation,
        // which outlives the reader. The slot is InFlight, so no other code
        // will touch this memory region until its completion is recorded.
        let push_result = unsafe { self.ring.submission().push(&read_op) };
        if let Err(e) = push_result {
            // SQE queue full — return the slot to the pool.
            self.pool.fail(token)?;
            return Err(RingError::log_push_error(e));
        }

        Ok(token)
    }

    /// Submit all enqueued SQEs to the kernel in a single syscall.
    ///
    /// Retries automatically on `EINTR`.
    pub fn flush(&mut self) -> RingResult<()> {
        loop {
            match self.ring.submit() {
                Ok(_) => return Ok(()),
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(RingError::log_submit_error(e)),
            }
        }
    }

    /// Register exactly one asynchronous read of `block_number` and notify the
    /// kernel. Does not block on completion; the read's success or failure is
    /// only observable through [`wait`](Self::wait).
    pub fn submit(&mut self, block_number: u64) -> RingResult<ReadToken> {
        let token = self.enqueue(block_number)?;
        self.flush()?;
        Ok(token)
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Block until at least one submitted read has finished, then return the
    /// oldest unclaimed completion.
    ///
    /// Returns `WaitFailed` when the wait primitive itself fails, and
    /// `OperationFailed` when the kernel posted a negative result for a read
    /// (that slot is freed; its buffer must not be read). Other completions
    /// reaped in the same batch stay claimable by further calls.
    ///
    /// Calling with nothing in flight is an `InvalidOperation`: the blocking
    /// wait would never return.
    pub fn wait(&mut self) -> RingResult<Completion> {
        loop {
            if let Some(completion) = self.ready.pop_front() {
                return Ok(completion);
            }
            if self.pool.in_flight() == 0 {
                return Err(RingError::log_invalid_operation(
                    "wait called with no requests in flight",
                ));
            }
            // submit_and_wait also flushes any un-submitted SQEs.
            loop {
                match self.ring.submit_and_wait(1) {
                    Ok(_) => break,
                    Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                    Err(e) => return Err(RingError::log_wait_error(e)),
                }
            }
            self.drain_cqes()?;
        }
    }

    /// Like [`wait`](Self::wait), but give up after `timeout` and return
    /// `Ok(None)`. Usable where an unbounded block is unacceptable.
    pub fn wait_timeout(&mut self, timeout: Duration) -> RingResult<Option<Completion>> {
        if let Some(completion) = self.ready.pop_front() {
            return Ok(Some(completion));
        }
        if self.pool.in_flight() == 0 {
            return Err(RingError::log_invalid_operation(
                "wait_timeout called with no requests in flight",
            ));
        }

        let ts = io_uring::types::Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let args = io_uring::types::SubmitArgs::new().timespec(&ts);

        loop {
            match self.ring.submitter().submit_with_args(1, &args) {
                Ok(_) => break,
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                // Deadline expired; a completion may still have raced in.
                Err(ref e) if e.raw_os_error() == Some(libc::ETIME) => break,
                Err(e) => return Err(RingError::log_wait_error(e)),
            }
        }

        self.drain_cqes()?;
        Ok(self.ready.pop_front())
    }

    /// Non-blocking completion check, for embedding the ring in a larger event
    /// loop. Returns the oldest unclaimed completion, if any has been posted.
    pub fn poll(&mut self) -> RingResult<Option<Completion>> {
        if let Some(completion) = self.ready.pop_front() {
            return Ok(Some(completion));
        }
        self.drain_cqes()?;
        Ok(self.ready.pop_front())
    }

    /// Drain all available CQEs from the completion queue into the ready list.
    ///
    /// Processes every available CQE. On a negative result the affected slot is
    /// freed and the first such error is propagated after all CQEs have been
    /// consumed (so no records are left unprocessed); successfully completed
    /// reads are still claimable.
    fn drain_cqes(&mut self) -> RingResult<()> {
        let mut first_error: Option<RingError> = None;

        for cqe in self.ring.completion() {
            let token = match self.pool.resolve(cqe.user_data()) {
                Ok(token) => token,
                Err(e) => {
                    // Stale or corrupted record: discard it rather than cast it
                    // into a buffer.
                    warn!(user_data = cqe.user_data(), "discarding stale completion");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    continue;
                }
            };

            if cqe.result() < 0 {
                let offset = self.pool.offset(token)?;
                self.pool.fail(token)?;
                if first_error.is_none() {
                    first_error = Some(
                        RingError::log_operation_error(io::Error::from_raw_os_error(
                            -cqe.result(),
                        ))
                        .context(format!("read at offset {} failed", offset)),
                    );
                }
                continue;
            }

            // Zero-length and short reads are boundary successes: `bytes_read`
            // reflects end-of-file, not an error.
            let bytes_read = cqe.result() as usize;
            self.pool.complete(token, bytes_read)?;
            self.ready.push_back(Completion { token, bytes_read });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------

    /// Borrow the valid bytes of a completed read: exactly `bytes_read` bytes.
    pub fn data(&self, token: ReadToken) -> RingResult<&[u8]> {
        self.pool.data(token)
    }

    /// Return a completed slot to the pool for reuse, invalidating the token.
    pub fn release(&mut self, token: ReadToken) -> RingResult<()> {
        self.pool.release(token)
    }

    // ------------------------------------------------------------------
    // Lifecycle helpers
    // ------------------------------------------------------------------

    /// Returns `true` if a free slot is available for [`enqueue`](Self::enqueue).
    pub fn has_free_slot(&self) -> bool {
        self.pool.has_free_slot()
    }

    /// Returns the number of submitted but not yet completed reads.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn queue_depth(&self) -> usize {
        self.pool.queue_depth()
    }

    /// Drain all in-flight IOs, blocking until they complete.
    ///
    /// On transient errors (`EINTR`) retries automatically. On unrecoverable
    /// errors aborts the process — deallocating the pool while the kernel
    /// still holds DMA references would cause memory corruption.
    fn drain_all(&mut self) {
        let mut remaining = self.pool.in_flight();
        while remaining > 0 {
            match self.ring.submit_and_wait(remaining) {
                Ok(_) => {}
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(_) => {
                    // Cannot safely deallocate while kernel may have DMA refs.
                    std::process::abort();
                }
            }
            for cqe in self.ring.completion() {
                let _ = cqe;
                remaining = remaining.saturating_sub(1);
            }
        }
    }
}

impl Drop for UringBlockReader {
    fn drop(&mut self) {
        // Must wait for all in-flight kernel IOs to complete before the pool
        // allocation is freed.
        self.drain_all();
    }
}

impl BlockReader for UringBlockReader {
    fn submit(&mut self, block_number: u64) -> RingResult<ReadToken> {
        UringBlockReader::submit(self, block_number)
    }

    fn wait(&mut self) -> RingResult<Completion> {
        UringBlockReader::wait(self)
    }

    fn data(&self, token: ReadToken) -> RingResult<&[u8]> {
        UringBlockReader::data(self, token)
    }

    fn release(&mut self, token: ReadToken) -> RingResult<()> {
        UringBlockReader::release(self, token)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}
