/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::io::Write;

use blockring::{RingConfig, UringBlockReader};
use criterion::Criterion;

const BLOCK: usize = 1024;
const N_BLOCKS: usize = 256;

/// Benchmark the submit → wait → release cycle of the block reader.
///
/// # Run this before making your code change
/// cargo bench --bench bench_main -p blockring -- --save-baseline prior_to_change
///
/// # Run this after making your code change to generate comparison metrics
/// cargo bench --bench bench_main -p blockring -- --baseline prior_to_change
pub fn benchmark_block_read(c: &mut Criterion) {
    let mut file = tempfile::NamedTempFile::new().expect("create tempfile");
    for i in 0..N_BLOCKS {
        file.write_all(&vec![(i & 0xFF) as u8; BLOCK])
            .expect("write block");
    }
    file.flush().expect("flush");

    let config = RingConfig {
        block_size: BLOCK,
        queue_depth: 8,
        direct_io: false,
        sqpoll_idle_ms: None,
    };
    let mut reader =
        UringBlockReader::open(file.path().to_str().expect("utf-8 path"), &config).unwrap();

    let mut group = c.benchmark_group("block_read");
    group.sample_size(200);

    group.bench_function("submit_wait_release one block", |bencher| {
        let mut block = 0u64;
        bencher.iter(|| {
            reader.submit(block % N_BLOCKS as u64).unwrap();
            let completion = reader.wait().unwrap();
            assert_eq!(completion.bytes_read, BLOCK);
            reader.release(completion.token).unwrap();
            block += 1;
        })
    });

    group.finish();
}
