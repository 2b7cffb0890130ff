/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use benchmarks::block_read_bench::benchmark_block_read;
use criterion::{criterion_group, criterion_main};

mod benchmarks;

criterion_group!(benches, benchmark_block_read);

criterion_main!(benches);
