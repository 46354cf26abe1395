//! Fuzz target for the dispatch pipeline
//!
//! Drives a real driver over the simulated partition with arbitrary
//! open/dispatch/close/cancel/fault sequences and compares it against the
//! reference model after every step.
//!
//! # Invariants
//!
//! - Outcomes match the model
//! - Lock acquisitions and releases balance once nothing is in flight
//! - Power constraints and dependencies never underflow
//! - Callbacks fire at most once per dispatched operation

#![no_main]

use libfuzzer_sys::fuzz_target;
use nsbridge_harness::{Operation, model};

fuzz_target!(|ops: Vec<Operation>| {
    if ops.len() > 256 {
        return;
    }
    if let Err(divergence) = model::run(&ops) {
        panic!("{divergence}");
    }
});
