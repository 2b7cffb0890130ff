/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
pub mod cmd_tool_error;
pub use cmd_tool_error::*;

pub mod fetch_block;
pub use fetch_block::*;

pub type CMDResult<T> = Result<T, CMDToolError>;

pub mod tracing;
pub use tracing::{init_subscriber, init_test_subscriber};
