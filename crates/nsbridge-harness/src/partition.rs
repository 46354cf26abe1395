//! Simulated secure partition.
//!
//! [`SimPartition`] stands in for the secure half of one family's driver. It
//! issues handles from a static range and a construct pool, keeps the relays
//! it is handed, validates message shapes, runs operations through an
//! [`Executor`], and posts completions from its own context.
//!
//! ```text
//!   Driver ── call() ──► SimPartition ── execute() ──► Executor
//!      ▲                      │
//!      └──── Relay::post ◄────┘   inline, timer thread, or test-driven
//! ```
//!
//! Fault knobs make the partition misbehave the ways a real one can: refuse
//! opens, refuse relay registration, reject operations with a status word, or
//! drop the transport entirely.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use nsbridge_core::{
    ChannelError, Family, Message, Notification, OperationKind, PollingCompletion,
    SecureCallback, SecureChannel, Serialization,
};
use nsbridge_proto::{HandleId, InVec, MessageType, OutVec, PsaStatus, ReturnMode, Status};

use crate::executor::Executor;

/// When the partition posts asynchronous completions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timing {
    /// Inside the operation call, before it returns
    #[default]
    Immediate,
    /// From a separate thread after the delay
    Deferred(Duration),
    /// Only when the test calls [`SimPartition::complete_next`]
    Manual,
}

/// Partition layout and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Instances reachable through `OPEN`
    pub static_slots: u8,
    /// Instances reachable through `CONSTRUCT`
    pub pool_slots: u8,
    /// Completion timing
    pub timing: Timing,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { static_slots: 4, pool_slots: 4, timing: Timing::Immediate }
    }
}

/// Tracks how many operations occupy one accelerator at a time.
///
/// Partitions of families that share an accelerator share one of these.
#[derive(Debug, Clone, Default)]
pub struct Accelerator {
    inner: Arc<Occupancy>,
}

#[derive(Debug, Default)]
struct Occupancy {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Accelerator {
    /// Idle accelerator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations currently running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Largest number of operations that ever ran at once.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_active.load(Ordering::Acquire)
    }

    fn enter(&self) {
        let now = self.inner.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.max_active.fetch_max(now, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One secure call as the partition saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    /// Message type code
    pub code: u8,
    /// Target handle, `None` for open and construct
    pub handle: Option<HandleId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    refuse_open: bool,
    refuse_registration: bool,
    reject_operations: Option<Status>,
    transport_down: bool,
}

struct InFlight<F: Family> {
    ticket: u64,
    msg_type: F::MsgType,
    operation: F::Operation,
    counts_occupancy: bool,
    canceled: bool,
}

struct Slot<F: Family> {
    handle: Option<HandleId>,
    generation: u8,
    mode: ReturnMode,
    callback: Option<Arc<dyn SecureCallback<F>>>,
    in_flight: VecDeque<InFlight<F>>,
}

impl<F: Family> Slot<F> {
    fn vacant() -> Self {
        Self {
            handle: None,
            generation: 0,
            mode: ReturnMode::Blocking,
            callback: None,
            in_flight: VecDeque::new(),
        }
    }
}

struct State<F: Family> {
    slots: Vec<Slot<F>>,
    faults: Faults,
    calls: Vec<CallRecord>,
    held: VecDeque<(usize, u64)>,
    next_ticket: u64,
}

struct Inner<F: Family, X> {
    executor: X,
    config: PartitionConfig,
    accelerator: Accelerator,
    state: Mutex<State<F>>,
    completions: AtomicUsize,
}

/// Secure partition simulator for family `F`.
///
/// Cheap to clone; clones share all state.
pub struct SimPartition<F: Family, X> {
    inner: Arc<Inner<F, X>>,
}

impl<F: Family, X> Clone for SimPartition<F, X> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<F: Family, X> fmt::Debug for SimPartition<F, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimPartition")
            .field("family", &F::NAME)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn programmer_error() -> ChannelError {
    ChannelError::Rejected(PsaStatus::PROGRAMMER_ERROR)
}

impl<F: Family, X: Executor<F>> SimPartition<F, X> {
    /// Partition with the default layout and immediate completions.
    pub fn new(executor: X) -> Self {
        Self::with_config(executor, PartitionConfig::default())
    }

    /// Partition with an explicit layout and timing.
    pub fn with_config(executor: X, config: PartitionConfig) -> Self {
        Self::on_accelerator(executor, config, Accelerator::new())
    }

    /// Partition whose operations occupy `accelerator`.
    pub fn on_accelerator(executor: X, config: PartitionConfig, accelerator: Accelerator) -> Self {
        let count = usize::from(config.static_slots) + usize::from(config.pool_slots);
        let slots = (0..count).map(|_| Slot::vacant()).collect();
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                accelerator,
                state: Mutex::new(State {
                    slots,
                    faults: Faults::default(),
                    calls: Vec::new(),
                    held: VecDeque::new(),
                    next_ticket: 0,
                }),
                completions: AtomicUsize::new(0),
            }),
        }
    }

    /// Executor operations run on.
    pub fn executor(&self) -> &X {
        &self.inner.executor
    }

    /// Accelerator occupancy.
    pub fn accelerator(&self) -> &Accelerator {
        &self.inner.accelerator
    }

    /// Answer `OPEN` and `CONSTRUCT` with a NULL handle.
    pub fn refuse_open(&self, refuse: bool) {
        self.state().faults.refuse_open = refuse;
    }

    /// Fail `REGISTER_CALLBACK` at the transport.
    pub fn refuse_registration(&self, refuse: bool) {
        self.state().faults.refuse_registration = refuse;
    }

    /// Answer operation messages with `status` without running them.
    pub fn reject_operations(&self, status: Option<Status>) {
        self.state().faults.reject_operations = status;
    }

    /// Fail every call at the transport.
    pub fn transport_down(&self, down: bool) {
        self.state().faults.transport_down = down;
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    /// Number of calls received with `msg_type`.
    pub fn call_count(&self, msg_type: F::MsgType) -> usize {
        let code = msg_type.code();
        self.state().calls.iter().filter(|call| call.code == code).count()
    }

    /// Handles currently open on the secure side.
    pub fn open_handles(&self) -> usize {
        self.state().slots.iter().filter(|slot| slot.handle.is_some()).count()
    }

    /// Handles with a registered relay.
    pub fn registered_callbacks(&self) -> usize {
        self.state().slots.iter().filter(|slot| slot.callback.is_some()).count()
    }

    /// Operations accepted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.state().slots.iter().map(|slot| slot.in_flight.len()).sum()
    }

    /// Completions posted so far.
    pub fn completions(&self) -> usize {
        self.inner.completions.load(Ordering::Acquire)
    }

    /// Completions waiting for [`SimPartition::complete_next`].
    pub fn held(&self) -> usize {
        self.state().held.len()
    }

    /// Post the oldest held completion. Returns false if none was held.
    pub fn complete_next(&self) -> bool {
        let next = self.state().held.pop_front();
        next.is_some_and(|(index, ticket)| self.complete(index, ticket))
    }

    /// Post every held completion. Returns how many were posted.
    pub fn complete_all(&self) -> usize {
        let mut posted = 0;
        while self.complete_next() {
            posted += 1;
        }
        posted
    }

    fn state(&self) -> MutexGuard<'_, State<F>> {
        #[allow(clippy::expect_used)]
        self.inner.state.lock().expect("partition state mutex poisoned")
    }

    /// Run the oldest in-flight operation of slot `index` and post its
    /// completion. Stale tickets are ignored.
    ///
    /// Queued operations finish in the order they were accepted. A `ticket`
    /// that fires ahead of an older one completes the oldest and hands its
    /// own place in the queue to the oldest's ticket.
    fn complete(&self, index: usize, ticket: u64) -> bool {
        let (callback, notification) = {
            let mut state = self.state();
            let Some(slot) = state.slots.get_mut(index) else {
                return false;
            };
            let Some(handle) = slot.handle else {
                return false;
            };
            let Some(position) = slot.in_flight.iter().position(|f| f.ticket == ticket) else {
                return false;
            };
            let oldest = slot.in_flight[0].ticket;
            slot.in_flight[position].ticket = oldest;
            let Some(flight) = slot.in_flight.pop_front() else {
                return false;
            };

            let mut operation = flight.operation;
            let status = if flight.canceled {
                Status::CANCELED
            } else {
                self.inner.executor.execute(handle, flight.msg_type, &mut operation)
            };
            if flight.counts_occupancy {
                self.inner.accelerator.exit();
            }

            let notification = Notification {
                handle,
                status,
                kind: flight.msg_type,
                operation: Some(operation),
            };
            (slot.callback.clone(), notification)
        };

        self.inner.completions.fetch_add(1, Ordering::AcqRel);
        match callback {
            Some(callback) => callback.post(notification),
            None => {
                let handle = notification.handle;
                tracing::warn!(%handle, "no relay registered, completion lost");
            },
        }
        true
    }

    fn slot_index(state: &State<F>, handle: HandleId) -> Result<usize, ChannelError> {
        let index = handle.index();
        match state.slots.get(index) {
            Some(slot) if slot.handle == Some(handle) => Ok(index),
            _ => Err(programmer_error()),
        }
    }

    fn issue(&self, state: &mut State<F>, index: usize, mode: ReturnMode) -> HandleId {
        let slot = &mut state.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let handle = HandleId::new(F::ID, slot.generation, index as u8);
        slot.handle = Some(handle);
        slot.mode = mode;
        handle
    }

    fn open(&self, index: u8, mode: ReturnMode, params: &F::Params) -> Option<HandleId> {
        let mut state = self.state();
        let index = usize::from(index);
        if state.faults.refuse_open
            || index >= usize::from(self.inner.config.static_slots)
            || state.slots[index].handle.is_some()
        {
            return None;
        }
        let handle = self.issue(&mut state, index, mode);
        drop(state);
        self.inner.executor.open(handle, params);
        Some(handle)
    }

    fn construct(&self, mode: ReturnMode, params: &F::Params) -> Option<HandleId> {
        let mut state = self.state();
        if state.faults.refuse_open {
            return None;
        }
        let first = usize::from(self.inner.config.static_slots);
        let index = (first..state.slots.len()).find(|&i| state.slots[i].handle.is_none())?;
        let handle = self.issue(&mut state, index, mode);
        drop(state);
        self.inner.executor.open(handle, params);
        Some(handle)
    }

    fn close(&self, handle: HandleId) -> Result<(), ChannelError> {
        let (index, interrupted) = {
            let mut state = self.state();
            let index = Self::slot_index(&state, handle)?;
            // closing aborts the running operation and everything queued behind it
            let slot = &mut state.slots[index];
            for flight in &mut slot.in_flight {
                flight.canceled = true;
            }
            let interrupted: Vec<u64> = slot.in_flight.iter().map(|flight| flight.ticket).collect();
            state.held.retain(|&(held, _)| held != index);
            (index, interrupted)
        };
        for ticket in interrupted {
            self.complete(index, ticket);
        }

        let mut state = self.state();
        let slot = &mut state.slots[index];
        slot.handle = None;
        slot.callback = None;
        drop(state);
        self.inner.executor.close(handle);
        Ok(())
    }

    fn operation(
        &self,
        msg_type: F::MsgType,
        kind: OperationKind,
        handle: HandleId,
        operation: &mut F::Operation,
        outvec: &mut OutVec<'_>,
    ) -> Result<(), ChannelError> {
        let mut state = self.state();
        let index = Self::slot_index(&state, handle)?;

        if let Some(status) = state.faults.reject_operations {
            outvec.write(status.to_word());
            return Ok(());
        }

        if kind.is_synchronous() {
            drop(state);
            let status = self.inner.executor.execute(handle, msg_type, operation);
            outvec.write(status.to_word());
            return Ok(());
        }

        let counts_occupancy = F::SERIALIZATION == Serialization::Exclusive;
        let slot = &mut state.slots[index];
        if counts_occupancy && !slot.in_flight.is_empty() {
            outvec.write(Status::RESOURCE_UNAVAILABLE.to_word());
            return Ok(());
        }

        let inline =
            slot.mode == ReturnMode::Polling && F::POLLING == PollingCompletion::Synchronous;
        if inline {
            drop(state);
            if counts_occupancy {
                self.inner.accelerator.enter();
            }
            let status = self.inner.executor.execute(handle, msg_type, operation);
            if counts_occupancy {
                self.inner.accelerator.exit();
            }
            outvec.write(status.to_word());
            return Ok(());
        }

        if counts_occupancy {
            self.inner.accelerator.enter();
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.slots[index].in_flight.push_back(InFlight {
            ticket,
            msg_type,
            operation: operation.clone(),
            counts_occupancy,
            canceled: false,
        });
        outvec.write(Status::SUCCESS.to_word());

        match self.inner.config.timing {
            Timing::Immediate => {
                drop(state);
                self.complete(index, ticket);
            },
            Timing::Deferred(delay) => {
                drop(state);
                let partition = self.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    partition.complete(index, ticket);
                });
            },
            Timing::Manual => state.held.push_back((index, ticket)),
        }
        Ok(())
    }

    fn cancel(&self, handle: HandleId, outvec: &mut OutVec<'_>) -> Result<(), ChannelError> {
        let mut state = self.state();
        let index = Self::slot_index(&state, handle)?;
        if let Some(running) = state.slots[index].in_flight.front_mut() {
            running.canceled = true;
        }
        outvec.write(Status::SUCCESS.to_word());
        Ok(())
    }
}

impl<F: Family, X: Executor<F>> SecureChannel<F> for SimPartition<F, X> {
    fn call(
        &self,
        msg_type: F::MsgType,
        mut invec: InVec<'_, Message<'_, F>>,
        mut outvec: OutVec<'_>,
    ) -> Result<(), ChannelError> {
        let faults = {
            let mut state = self.state();
            let handle = invec.base().handle();
            state.calls.push(CallRecord { code: msg_type.code(), handle });
            state.faults
        };
        if faults.transport_down {
            return Err(ChannelError::Unavailable);
        }
        if invec.len() != invec.base().len() {
            return Err(programmer_error());
        }

        let expects_word = !matches!(
            invec.base(),
            Message::Close(_) | Message::RegisterCallback(_) | Message::Reset(_)
        );
        if expects_word == outvec.is_empty() {
            return Err(programmer_error());
        }

        match invec.base_mut() {
            Message::Open(msg) => {
                let handle = self.open(msg.index, msg.params.return_mode, msg.params.custom);
                outvec.write(handle.map_or(0, HandleId::to_word));
                Ok(())
            },
            Message::Construct(msg) => {
                let handle = self.construct(msg.params.return_mode, msg.params.custom);
                outvec.write(handle.map_or(0, HandleId::to_word));
                Ok(())
            },
            Message::Close(msg) => self.close(msg.handle),
            Message::RegisterCallback(msg) => {
                if faults.refuse_registration {
                    return Err(ChannelError::Rejected(PsaStatus::CONNECTION_REFUSED));
                }
                let mut state = self.state();
                let index = Self::slot_index(&state, msg.handle)?;
                state.slots[index].callback = Some(Arc::clone(&msg.callback));
                Ok(())
            },
            Message::Cancel(msg) => self.cancel(msg.handle, &mut outvec),
            Message::Reset(msg) => {
                Self::slot_index(&self.state(), msg.handle)?;
                self.inner.executor.reset(msg.handle);
                Ok(())
            },
            message => {
                let (Some(kind), Some(handle)) = (message.kind(), message.handle()) else {
                    return Err(programmer_error());
                };
                let Some(operation) = message.operation_mut() else {
                    return Err(programmer_error());
                };
                self.operation(msg_type, kind, handle, operation, &mut outvec)
            },
        }
    }
}
