//! Benchmark harnesses driven by the `relay_bench` binary.

pub mod stream_load;
