/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub mod ring_error;
pub use ring_error::{ErrorContext, RingError, RingErrorKind, RingResult};
