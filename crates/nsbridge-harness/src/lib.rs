//! Simulation harness for the non-secure bridge.
//!
//! Stands up the secure half of the protocol in-process so drivers can be
//! exercised end to end without hardware.
//!
//! # Simulated Partition
//!
//! [`SimPartition`] implements [`nsbridge_core::SecureChannel`] for one family.
//! It issues handles, keeps registered relays, runs operations through an
//! [`Executor`], and posts completions inline, from a timer thread, or when a
//! test asks it to. [`ChaoticChannel`] wraps any channel and fails calls at
//! the transport with a seeded probability.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks resource accounting through a
//! [`BridgeSnapshot`]. Use [`InvariantRegistry::standard()`] for the full set.
//!
//! # Model-Based Testing
//!
//! The `model` module applies generated [`Operation`] sequences to both a
//! reference model and a real driver and compares their outcomes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
pub mod executor;
pub mod invariants;
pub mod model;
pub mod partition;

pub use chaotic::ChaoticChannel;
pub use executor::{
    AesCcmEngine, AesCtrEngine, AesEcbEngine, EcdhEngine, ExecFn, Executor, FailWith, Sha2Engine,
    Succeed, TrngEngine,
};
pub use invariants::{
    BridgeSnapshot, ConstraintBalance, DependencyBalance, FamilySnapshot, Invariant,
    InvariantRegistry, InvariantResult, LockReleasedWhenIdle, MutualExclusion, NoSpuriousRelease,
    Violation,
};
pub use model::{BridgeWorld, ModelBridge, ModelMode, Operation, Outcome};
pub use partition::{Accelerator, CallRecord, PartitionConfig, SimPartition, Timing};

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
