/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use crate::error::{RingError, RingResult};
use crate::num::PowerOfTwo;

/// Bytes per request and per buffer slot in the default configuration.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Outstanding request slots in the default configuration.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Maximum number of concurrent IO operations supported by a ring.
pub const MAX_QUEUE_DEPTH: usize = 128;

/// Configuration for an io_uring-backed block reader.
///
/// Passed into the reader's constructor so multiple rings with different tuning
/// can coexist in one process; nothing here is a compile-time constant.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Bytes per request. Must be a power of two; every buffer slot has exactly
    /// this capacity and its base address is aligned to it.
    pub block_size: usize,

    /// Maximum number of requests outstanding at once. Bounds memory use to
    /// `queue_depth * block_size`.
    pub queue_depth: usize,

    /// Open the file with `O_DIRECT`, bypassing the kernel page cache. Buffered
    /// mode behaves identically apart from caching; alignment is enforced either
    /// way. Not every filesystem supports direct IO (tmpfs does not).
    pub direct_io: bool,

    /// Enable kernel-side SQ polling. If `Some(idle_ms)`, a kernel thread polls
    /// the submission queue, eliminating the syscall per submit. After `idle_ms`
    /// milliseconds of inactivity the kernel thread sleeps (resumed automatically
    /// on next submit). Requires Linux kernel >= 5.11 (>= 5.13 unprivileged).
    pub sqpoll_idle_ms: Option<u32>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            direct_io: false,
            sqpoll_idle_ms: None,
        }
    }
}

impl RingConfig {
    /// Validate the configuration, returning the block size as a checked power
    /// of two.
    pub fn validate(&self) -> RingResult<PowerOfTwo> {
        let block_size =
            PowerOfTwo::new(self.block_size).map_err(RingError::log_config_error)?;
        if self.queue_depth == 0 || self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(RingError::log_config_error(format_args!(
                "queue_depth {} is outside 1..={}",
                self.queue_depth, MAX_QUEUE_DEPTH
            )));
        }
        Ok(block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RingErrorKind;

    #[test]
    fn default_config_is_valid() {
        let config = RingConfig::default();
        assert_eq!(config.validate().unwrap().raw(), DEFAULT_BLOCK_SIZE);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn rejects_non_power_of_two_block_size() {
        let config = RingConfig {
            block_size: 1000,
            ..RingConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().kind(),
            RingErrorKind::ConfigError
        );
    }

    #[test]
    fn rejects_zero_queue_depth() {
        let config = RingConfig {
            queue_depth: 0,
            ..RingConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().kind(),
            RingErrorKind::ConfigError
        );
    }

    #[test]
    fn rejects_oversized_queue_depth() {
        let config = RingConfig {
            queue_depth: MAX_QUEUE_DEPTH + 1,
            ..RingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
