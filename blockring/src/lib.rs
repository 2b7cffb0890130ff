/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Asynchronous, zero-copy block reads from a file over Linux io_uring, into a
//! fixed pool of block-aligned buffer slots addressed by generation-checked
//! tokens.

pub mod error;
pub mod num;
pub mod pool;
pub mod ring;
pub mod traits;

// Top level exports.
pub use error::ring_error::{ErrorContext, RingError, RingErrorKind, RingResult};
pub use pool::{AlignedBytes, BlockPool, ReadToken};
pub use ring::{RingConfig, DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_DEPTH, MAX_QUEUE_DEPTH};
pub use traits::{BlockReader, Completion};

#[cfg(all(not(miri), target_os = "linux"))]
pub use ring::UringBlockReader;
