/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub mod config;
pub use config::{RingConfig, DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_DEPTH, MAX_QUEUE_DEPTH};

cfg_if::cfg_if! {
    if #[cfg(all(not(miri), target_os = "linux"))] {
        pub mod reader;
        pub use reader::UringBlockReader;
    }
}
