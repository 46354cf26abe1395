//! Model-based testing of the dispatch protocol.
//!
//! Operations are generated randomly (by proptest or a fuzzer) and applied to
//! both a reference model and a real AES-CTR driver talking to a simulated
//! partition. The model predicts each operation's outcome from a handful of
//! booleans; the real system must agree, and the standard invariants must hold
//! after every step.
//!
//! ```text
//! Vec<Operation> ──► ModelBridge::predict ──► expected Outcome
//!        │                                          │
//!        └─────► BridgeWorld::apply ──► actual ─────┴──► compare + invariants
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use arbitrary::Arbitrary;
use nsbridge_core::{
    AccessLock, Completion, Driver, DriverConfig, DriverError, Handle, Params, RefCountPower,
};
use nsbridge_drivers::{
    AesCtr, AesCtrDriver, CryptoKey,
    aesctr::AesCtrOneStep,
};
use nsbridge_proto::Status;

use crate::{
    executor::AesCtrEngine,
    invariants::{BridgeSnapshot, InvariantRegistry, Violation},
    partition::SimPartition,
};

/// Number of instance slots the model exercises.
pub const SLOTS: usize = 4;

/// Return behavior a model handle is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum ModelMode {
    /// Synchronous polling
    Polling,
    /// Blocking on the relay
    Blocking,
    /// Application callback
    Callback,
}

/// Operations that can be applied to the bridge.
///
/// Slot numbers are reduced modulo [`SLOTS`].
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Open instance `slot`.
    Open {
        /// Instance index
        slot: u8,
        /// Return behavior
        mode: ModelMode,
    },
    /// Close the handle open on `slot`.
    Close {
        /// Instance index
        slot: u8,
    },
    /// One-step encrypt `len` bytes on `slot`.
    Encrypt {
        /// Instance index
        slot: u8,
        /// Plaintext length
        len: u8,
    },
    /// Cancel on `slot`.
    Cancel {
        /// Instance index
        slot: u8,
    },
    /// Make the partition reject (or stop rejecting) operations.
    RejectOperations {
        /// Whether operations are rejected
        reject: bool,
    },
    /// Take the transport down or bring it back.
    Transport {
        /// Whether the transport is down
        down: bool,
    },
}

/// Observable result of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Operation had no handle to act on
    Skipped,
    /// Succeeded and finished
    Done,
    /// Succeeded and reported through the callback
    Pending,
    /// Secure side returned a NULL handle
    OpenRejected,
    /// Secure side rejected or failed the operation
    Failed,
    /// Secure call failed at the transport
    Transport,
    /// Any other error
    Other,
}

impl Outcome {
    fn of(result: &Result<Completion, DriverError>) -> Self {
        match result {
            Ok(Completion::Done) => Self::Done,
            Ok(Completion::Pending) => Self::Pending,
            Err(DriverError::OpenRejected { .. }) => Self::OpenRejected,
            Err(DriverError::Failed(_)) => Self::Failed,
            Err(DriverError::Channel(_)) => Self::Transport,
            Err(_) => Self::Other,
        }
    }
}

/// Reference model of the bridge.
#[derive(Debug, Clone, Default)]
pub struct ModelBridge {
    open: [Option<ModelMode>; SLOTS],
    secure_open: [bool; SLOTS],
    rejecting: bool,
    transport_down: bool,
    callbacks: usize,
}

impl ModelBridge {
    /// Fresh model: nothing open, no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks the model expects to have been delivered.
    pub fn expected_callbacks(&self) -> usize {
        self.callbacks
    }

    /// Predict `op`'s outcome and advance the model.
    pub fn apply(&mut self, op: &Operation) -> Outcome {
        match *op {
            Operation::Open { slot, mode } => {
                let slot = usize::from(slot) % SLOTS;
                if self.open[slot].is_some() {
                    return Outcome::Skipped;
                }
                if self.transport_down {
                    return Outcome::Transport;
                }
                if self.secure_open[slot] {
                    return Outcome::OpenRejected;
                }
                self.open[slot] = Some(mode);
                self.secure_open[slot] = true;
                Outcome::Done
            },
            Operation::Close { slot } => {
                let slot = usize::from(slot) % SLOTS;
                if self.open[slot].take().is_none() {
                    return Outcome::Skipped;
                }
                if self.transport_down {
                    return Outcome::Transport;
                }
                self.secure_open[slot] = false;
                Outcome::Done
            },
            Operation::Encrypt { slot, .. } => {
                let slot = usize::from(slot) % SLOTS;
                let Some(mode) = self.open[slot] else {
                    return Outcome::Skipped;
                };
                if self.transport_down {
                    return Outcome::Transport;
                }
                if self.rejecting {
                    return Outcome::Failed;
                }
                if mode == ModelMode::Callback {
                    self.callbacks += 1;
                    Outcome::Pending
                } else {
                    Outcome::Done
                }
            },
            Operation::Cancel { slot } => {
                let slot = usize::from(slot) % SLOTS;
                if self.open[slot].is_none() {
                    return Outcome::Skipped;
                }
                if self.transport_down { Outcome::Transport } else { Outcome::Done }
            },
            Operation::RejectOperations { reject } => {
                self.rejecting = reject;
                Outcome::Done
            },
            Operation::Transport { down } => {
                self.transport_down = down;
                Outcome::Done
            },
        }
    }
}

/// Simulated partition type the model world runs against.
pub type ModelPartition = SimPartition<AesCtr, AesCtrEngine>;

/// Real driver plus simulated partition, driven by [`Operation`]s.
pub struct BridgeWorld {
    driver: AesCtrDriver<ModelPartition>,
    partition: ModelPartition,
    handles: [Option<Handle>; SLOTS],
    callbacks: Arc<AtomicUsize>,
    registry: InvariantRegistry,
}

impl Default for BridgeWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeWorld {
    /// World with an initialized driver and immediate completions.
    pub fn new() -> Self {
        let partition = ModelPartition::new(AesCtrEngine::default());
        let driver = AesCtrDriver::new(Driver::new(
            partition.clone(),
            RefCountPower::new(),
            AccessLock::new(),
            DriverConfig::default(),
        ));
        driver.init();
        Self {
            driver,
            partition,
            handles: Default::default(),
            callbacks: Arc::new(AtomicUsize::new(0)),
            registry: InvariantRegistry::standard(),
        }
    }

    /// Driver under test.
    pub fn driver(&self) -> &AesCtrDriver<ModelPartition> {
        &self.driver
    }

    /// Simulated partition.
    pub fn partition(&self) -> &ModelPartition {
        &self.partition
    }

    /// Callbacks delivered so far.
    pub fn callbacks(&self) -> usize {
        self.callbacks.load(Ordering::Acquire)
    }

    fn params(&self, mode: ModelMode) -> Params<AesCtr> {
        match mode {
            ModelMode::Polling => Params::polling(),
            ModelMode::Blocking => Params::blocking(),
            ModelMode::Callback => {
                let callbacks = Arc::clone(&self.callbacks);
                Params::callback(move |notification| {
                    if notification.status == Status::SUCCESS {
                        callbacks.fetch_add(1, Ordering::AcqRel);
                    }
                })
            },
        }
    }

    /// Apply `op` to the real system and report its outcome.
    pub fn apply(&mut self, op: &Operation) -> Outcome {
        match *op {
            Operation::Open { slot, mode } => {
                let slot = usize::from(slot) % SLOTS;
                if self.handles[slot].is_some() {
                    return Outcome::Skipped;
                }
                match self.driver.open(slot as u8, Some(self.params(mode))) {
                    Ok(handle) => {
                        self.handles[slot] = Some(handle);
                        Outcome::Done
                    },
                    Err(error) => Outcome::of(&Err(error)),
                }
            },
            Operation::Close { slot } => {
                let slot = usize::from(slot) % SLOTS;
                let Some(handle) = self.handles[slot].take() else {
                    return Outcome::Skipped;
                };
                Outcome::of(&self.driver.close(handle).map(|()| Completion::Done))
            },
            Operation::Encrypt { slot, len } => {
                let slot = usize::from(slot) % SLOTS;
                let Some(handle) = &self.handles[slot] else {
                    return Outcome::Skipped;
                };
                let Ok(key) = CryptoKey::aes(vec![0x5a; 16]) else {
                    return Outcome::Other;
                };
                let mut op = AesCtrOneStep {
                    key,
                    input: vec![0xa5; usize::from(len)],
                    ..AesCtrOneStep::default()
                };
                let result = self.driver.one_step_encrypt(handle, &mut op);
                if result == Ok(Completion::Done) && op.output.len() != op.input.len() {
                    return Outcome::Other;
                }
                Outcome::of(&result)
            },
            Operation::Cancel { slot } => {
                let slot = usize::from(slot) % SLOTS;
                let Some(handle) = &self.handles[slot] else {
                    return Outcome::Skipped;
                };
                Outcome::of(&self.driver.cancel_operation(handle).map(|()| Completion::Done))
            },
            Operation::RejectOperations { reject } => {
                self.partition.reject_operations(reject.then_some(Status::ERROR));
                Outcome::Done
            },
            Operation::Transport { down } => {
                self.partition.transport_down(down);
                Outcome::Done
            },
        }
    }

    /// Snapshot of the driver's observable state.
    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot::of_driver(self.driver.inner())
            .with_max_concurrent(self.partition.accelerator().max_concurrent())
    }

    /// Run the standard invariants.
    pub fn check(&self) -> Result<(), Vec<Violation>> {
        self.registry.check_all(&self.snapshot())
    }
}

/// Run `ops` against model and world, returning the first divergence or
/// invariant violation.
pub fn run(ops: &[Operation]) -> Result<(), String> {
    let mut model = ModelBridge::new();
    let mut world = BridgeWorld::new();

    for (step, op) in ops.iter().enumerate() {
        let expected = model.apply(op);
        let actual = world.apply(op);
        if expected != actual {
            return Err(format!("step {step} {op:?}: model {expected:?}, real {actual:?}"));
        }
        if let Err(violations) = world.check() {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            return Err(format!("step {step} {op:?}: {}", messages.join("; ")));
        }
    }

    if model.expected_callbacks() != world.callbacks() {
        return Err(format!(
            "callbacks: model {}, real {}",
            model.expected_callbacks(),
            world.callbacks()
        ));
    }
    Ok(())
}
