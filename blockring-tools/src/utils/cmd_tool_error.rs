/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use blockring::RingError;
use thiserror::Error;

/// Top-level error for the command-line tools.
///
/// Every failure propagates here, gets reported, and terminates the process
/// with a non-zero status; nothing is recovered locally.
#[derive(Debug, Error)]
pub enum CMDToolError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
