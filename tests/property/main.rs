//! Property-based tests.
//!
//! Run with: `cargo test --test property`

mod input_parsing;
mod mlfq_runs;
