//! Algorithm family parameterization.
//!
//! The dispatch protocol is identical for every crypto driver. What differs is
//! captured by a [`Family`] implementation: message codes, the operation
//! struct handed to the secure side, open parameters, and a few policy
//! switches describing how the secure driver behaves.

use std::fmt::Debug;

use nsbridge_proto::{FamilyId, MessageType};

use crate::power::Resource;

/// How operations of a family are serialized on the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    /// Operations take the shared hardware-access lock
    Exclusive,
    /// The secure side queues operations itself; no lock is taken
    Queued,
}

/// When a family takes its power dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyScope {
    /// One reference per open handle
    PerHandle,
    /// One reference taken by `init`, never released
    AtInit,
}

/// How the secure side completes polling-mode operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingCompletion {
    /// The secure call returns once the operation is finished
    Synchronous,
    /// The secure side always completes through the relay, even for polling
    /// callers; the dispatcher spins on the relay's done flag
    Relayed,
}

/// A crypto algorithm family bridged to the secure partition.
pub trait Family: Sized + Send + Sync + 'static {
    /// Family name used in logs and errors
    const NAME: &'static str;
    /// Family byte embedded in handle words
    const ID: FamilyId;
    /// Power domain the family's accelerator lives in
    const RESOURCE: Resource;
    /// When the power dependency is taken
    const DEPENDENCY: DependencyScope = DependencyScope::PerHandle;
    /// Whether operations take the hardware-access lock
    const SERIALIZATION: Serialization = Serialization::Exclusive;
    /// How polling operations complete
    const POLLING: PollingCompletion = PollingCompletion::Synchronous;

    /// Message-type enum
    type MsgType: MessageType;
    /// Operation struct the secure side reads and updates
    type Operation: Clone + Debug + Send + 'static;
    /// Family-specific open parameters
    type Params: Clone + Debug + Default + Send + Sync + 'static;
}
