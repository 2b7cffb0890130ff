/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::io::Write;

use blockring::{RingConfig, UringBlockReader};
use blockring_tools::utils::{fetch_block, init_subscriber, CMDResult};
use clap::Parser;
use tracing::info;

fn main() -> CMDResult<()> {
    init_subscriber();

    let args: ReadBlockArgs = ReadBlockArgs::parse();

    let config = RingConfig {
        block_size: args.block_size,
        queue_depth: args.queue_depth,
        direct_io: args.direct,
        sqpoll_idle_ms: None,
    };

    let result = read_and_print(&args, &config);

    match result {
        Ok(bytes_read) => {
            info!(
                block_number = args.block_number,
                bytes_read, "block read completed successfully"
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: {:?}", err);
            Err(err)
        }
    }
}

/// Read the requested block and write its valid bytes to stdout followed by a
/// newline. Returns the number of bytes retrieved.
fn read_and_print(args: &ReadBlockArgs, config: &RingConfig) -> CMDResult<usize> {
    let mut reader = UringBlockReader::open(&args.file, config)?;
    let bytes = fetch_block(&mut reader, args.block_number)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(&bytes)?;
    handle.write_all(b"\n")?;
    Ok(bytes.len())
}

#[derive(Debug, Parser)]
struct ReadBlockArgs {
    /// Block number to read; the byte offset is block_number * block_size
    pub block_number: u64,

    /// Path to the file to read from (required)
    #[arg(long = "file", short, required = true)]
    pub file: String,

    /// Bytes per block; must be a power of two
    #[arg(long = "block_size", default_value = "1024")]
    pub block_size: usize,

    /// Maximum number of outstanding requests on the ring
    #[arg(long = "queue_depth", default_value = "2")]
    pub queue_depth: usize,

    /// Open the file with O_DIRECT, bypassing the kernel page cache
    #[arg(long = "direct", default_value = "false")]
    pub direct: bool,
}
