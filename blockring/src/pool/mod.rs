/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

mod aligned_bytes;
pub use aligned_bytes::AlignedBytes;

mod block_pool;
pub use block_pool::{BlockPool, ReadToken};
