//! Operation dispatcher.
//!
//! One [`Driver`] per algorithm family owns the family's handle table, init
//! gate, and secure channel, and shares the accelerator's [`AccessLock`] and
//! the process [`PowerManager`] with other families.
//!
//! # Dispatch Sequence
//!
//! ```text
//! caller          Driver                      secure side        Relay
//!   │ dispatch()    │                              │                │
//!   │──────────────►│ acquire lock (timeout)       │                │
//!   │               │ set DISALLOW_STANDBY         │                │
//!   │               │ queue ticket on relay        │                │
//!   │               │ call(msg, [status])  ───────►│                │
//!   │               │◄──────── status word ────────│                │
//!   │               │                              │ post() ───────►│
//!   │               │                              │  release lock  │
//!   │               │                              │  release cons. │
//!   │               │◄─────────── wake (sem / flag / callback) ─────│
//!   │◄──────────────│                              │                │
//! ```
//!
//! A non-success status word, or a transport failure, completes the
//! operation on the dispatching thread instead: its ticket is withdrawn from
//! the relay and the lock and constraint are released there.
//!
//! Families serialized by the access lock have one operation in flight at a
//! time. Queued families (TRNG) skip the lock and may stack several
//! operations on one handle; each gets its own ticket and completion.
//!
//! # Completion Models
//!
//! - Polling: the call returns once the operation is finished. Families whose
//!   secure side always completes through the relay are spun on instead.
//! - Blocking: the dispatcher pends on the handle's semaphore.
//! - Callback: the dispatcher returns [`Completion::Pending`]; the handle's
//!   callback receives the result.
//! - Async: [`Driver::dispatch_async`] returns a [`PendingOperation`].

use std::{fmt, sync::Arc};

use nsbridge_proto::{HandleId, InVec, MessageType, OutVec, Status, Word};
use tokio::sync::oneshot;

use crate::{
    channel::SecureChannel,
    config::{DriverConfig, HwConfig, Params, ReturnBehavior},
    error::DriverError,
    family::{DependencyScope, Family, PollingCompletion, Serialization},
    gate::InitGate,
    message::{
        CallbackMsg, CancelOperationMsg, CloseMsg, ConstructMsg, Message, OpenMsg, OperationKind,
        ResetMsg, WireParams,
    },
    power::{Constraint, PowerManager, RefCountPower},
    relay::{Notification, Relay, SecureCallback, Ticket},
    sync::AccessLock,
    table::{Entry, HandleTable},
};

/// Open driver instance, owned by the caller until passed to
/// [`Driver::close`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    id: HandleId,
}

impl Handle {
    /// Handle word issued by the secure side.
    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// Outcome of a successful dispatch.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Operation finished; the operation struct holds its results
    Done,
    /// Operation started; the handle's callback receives the result
    Pending,
}

/// Operation dispatched on an async handle.
#[must_use = "the operation's result is only observable through wait()"]
pub struct PendingOperation<F: Family> {
    handle: HandleId,
    receiver: oneshot::Receiver<Notification<F>>,
    operation: F::Operation,
}

impl<F: Family> PendingOperation<F> {
    /// Handle the operation runs on.
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Wait for the secure side to complete the operation.
    ///
    /// # Errors
    ///
    /// - `DriverError::Failed` with the completion status on failure
    /// - `DriverError::Disconnected` if the handle was closed first
    pub async fn wait(self) -> Result<F::Operation, DriverError> {
        let notification = self.receiver.await.map_err(|_| DriverError::Disconnected)?;
        if !notification.status.is_success() {
            return Err(DriverError::Failed(notification.status));
        }
        Ok(notification.operation.unwrap_or(self.operation))
    }
}

impl<F: Family> fmt::Debug for PendingOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation").field("handle", &self.handle).finish_non_exhaustive()
    }
}

struct Shared<F: Family, C, P> {
    channel: C,
    power: P,
    access: AccessLock,
    table: HandleTable<F, P>,
    gate: InitGate,
    config: DriverConfig,
}

/// Non-secure half of one algorithm family's driver.
///
/// Cheap to clone; clones share all state.
pub struct Driver<F: Family, C, P = RefCountPower> {
    shared: Arc<Shared<F, C, P>>,
}

impl<F: Family, C, P> Clone for Driver<F, C, P> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<F: Family, C, P> fmt::Debug for Driver<F, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("family", &F::NAME)
            .field("gate", &self.shared.gate)
            .field("open_handles", &self.shared.table.len())
            .finish_non_exhaustive()
    }
}

impl<F: Family, C: SecureChannel<F>, P: PowerManager> Driver<F, C, P> {
    /// Create a driver over `channel`, serializing on `access`.
    pub fn new(channel: C, power: P, access: AccessLock, config: DriverConfig) -> Self {
        debug_assert!(config.max_handles <= 256, "slot indices are one byte");
        Self {
            shared: Arc::new(Shared {
                channel,
                table: HandleTable::new(config.max_handles),
                power,
                access,
                gate: InitGate::new(),
                config,
            }),
        }
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        let shared = &self.shared;
        let ran = shared.gate.initialize(|| {
            shared.channel.init();
            if F::DEPENDENCY == DependencyScope::AtInit {
                if let Err(error) = shared.power.set_dependency(F::RESOURCE) {
                    tracing::warn!(family = F::NAME, %error, "power dependency not taken");
                }
            }
        });
        if ran {
            tracing::debug!(family = F::NAME, "driver initialized");
        }
    }

    /// True once [`Driver::init`] has run.
    pub fn is_initialized(&self) -> bool {
        self.shared.gate.is_initialized()
    }

    /// Open the statically configured instance `index`.
    ///
    /// `None` selects [`Params::default`].
    ///
    /// # Errors
    ///
    /// - `DriverError::NotInitialized` before [`Driver::init`]
    /// - `DriverError::OpenRejected` if the secure side returned NULL
    /// - `DriverError::RegistrationFailed` if the relay could not be
    ///   registered; the secure-side handle is leaked
    pub fn open(&self, index: u8, params: Option<Params<F>>) -> Result<Handle, DriverError> {
        self.ensure_initialized()?;
        let params = params.unwrap_or_default();

        let message = Message::Open(OpenMsg { index, params: wire_params(&params) });
        let handle = self.request_handle(<F::MsgType as MessageType>::OPEN, message)?;

        self.attach(handle, params)
    }

    /// Open an instance from caller-supplied hardware configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Driver::open`].
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<F>>,
    ) -> Result<Handle, DriverError> {
        self.ensure_initialized()?;
        let params = params.unwrap_or_default();

        let message = Message::Construct(ConstructMsg { config, params: wire_params(&params) });
        let handle = self.request_handle(<F::MsgType as MessageType>::CONSTRUCT, message)?;

        self.attach(handle, params)
    }

    /// Close `handle`.
    ///
    /// Completions that arrive after this call are dropped.
    ///
    /// # Errors
    ///
    /// - `DriverError::InvalidHandle` if the handle is not open on this driver
    /// - `DriverError::Channel` if the close message could not be delivered;
    ///   the handle is closed on the non-secure side regardless
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        let entry = self.shared.table.remove(handle.id)?;
        entry.relay.destruct();

        let mut message = Message::Close(CloseMsg { handle: handle.id });
        let sent = self.call(<F::MsgType as MessageType>::CLOSE, &mut message, OutVec::none());

        self.release_handle_dependency();
        tracing::debug!(family = F::NAME, handle = %handle.id, "handle closed");

        sent.map_err(|error| {
            tracing::warn!(family = F::NAME, handle = %handle.id, %error, "close not delivered");
            DriverError::from(error)
        })
    }

    /// Dispatch an operation through the hardware-access lock.
    ///
    /// Returns [`Completion::Done`] for polling and blocking handles and
    /// [`Completion::Pending`] for callback handles.
    ///
    /// # Errors
    ///
    /// - `DriverError::ResourceUnavailable` if the lock was not acquired
    ///   within the handle's timeout; nothing was sent
    /// - `DriverError::Failed` if the secure side rejected or failed the
    ///   operation
    /// - `DriverError::Channel` on transport failure
    /// - `DriverError::WrongReturnBehavior` for async handles
    pub fn dispatch(
        &self,
        handle: &Handle,
        msg_type: F::MsgType,
        kind: OperationKind,
        operation: &mut F::Operation,
    ) -> Result<Completion, DriverError> {
        debug_assert!(!kind.is_synchronous(), "control messages go through call_direct");
        let entry = self.shared.table.get(handle.id)?;
        if matches!(entry.behavior, ReturnBehavior::Async) {
            return Err(DriverError::WrongReturnBehavior {
                expected: "polling, blocking or callback",
                actual: entry.behavior.mode(),
            });
        }

        let ticket = self.begin(&entry, None)?;
        let sent = self.send_operation(&entry, msg_type, kind, operation);
        self.settle(&entry, &ticket, sent)?;

        self.wait_for_result(&entry, &ticket, operation)
    }

    /// Dispatch an operation on an async handle.
    ///
    /// The operation is moved into the returned [`PendingOperation`], which
    /// yields it back with the secure side's results.
    ///
    /// # Errors
    ///
    /// As [`Driver::dispatch`]; `DriverError::WrongReturnBehavior` for
    /// non-async handles.
    pub fn dispatch_async(
        &self,
        handle: &Handle,
        msg_type: F::MsgType,
        kind: OperationKind,
        mut operation: F::Operation,
    ) -> Result<PendingOperation<F>, DriverError> {
        let entry = self.shared.table.get(handle.id)?;
        if !matches!(entry.behavior, ReturnBehavior::Async) {
            return Err(DriverError::WrongReturnBehavior {
                expected: "async",
                actual: entry.behavior.mode(),
            });
        }

        let (sender, receiver) = oneshot::channel();
        let ticket = self.begin(&entry, Some(sender))?;
        let sent = self.send_operation(&entry, msg_type, kind, &mut operation);
        self.settle(&entry, &ticket, sent)?;

        Ok(PendingOperation { handle: entry.handle, receiver, operation })
    }

    /// Send a control message without the lock or power constraint.
    ///
    /// For messages the secure side handles without starting the hardware,
    /// such as segmented-operation setup. The result is the status word the
    /// call returns; the relay is not involved.
    ///
    /// # Errors
    ///
    /// - `DriverError::Failed` with the returned status if not successful
    /// - `DriverError::Channel` on transport failure
    pub fn call_direct(
        &self,
        handle: &Handle,
        msg_type: F::MsgType,
        operation: &mut F::Operation,
    ) -> Result<(), DriverError> {
        let entry = self.shared.table.get(handle.id)?;
        let status = self.send_operation(&entry, msg_type, OperationKind::Control, operation)?;
        check(status)
    }

    /// Request cancellation of the handle's in-flight operation.
    ///
    /// Neither takes nor releases the lock. The canceled operation still
    /// completes through its own path, typically with
    /// [`Status::CANCELED`].
    ///
    /// # Errors
    ///
    /// - `DriverError::Failed` with the secure side's cancel status
    /// - `DriverError::Channel` on transport failure
    pub fn cancel_operation(&self, handle: &Handle) -> Result<(), DriverError> {
        let entry = self.shared.table.get(handle.id)?;

        let mut word = Status::ERROR.to_word();
        let mut message = Message::Cancel(CancelOperationMsg { handle: entry.handle });
        let msg_type = <F::MsgType as MessageType>::CANCEL_OPERATION;
        self.call(msg_type, &mut message, OutVec::word(&mut word))?;

        tracing::debug!(family = F::NAME, handle = %entry.handle, "cancel requested");
        check(Status::from_word(word))
    }

    /// Send a fire-and-forget reset of segmented-operation state.
    ///
    /// # Errors
    ///
    /// `DriverError::Channel` on transport failure.
    pub fn reset(&self, handle: &Handle, msg_type: F::MsgType) -> Result<(), DriverError> {
        let entry = self.shared.table.get(handle.id)?;
        let mut message = Message::Reset(ResetMsg { handle: entry.handle });
        self.call(msg_type, &mut message, OutVec::none())?;
        Ok(())
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.shared.table.len()
    }

    /// Capacity of the handle table.
    pub fn max_handles(&self) -> usize {
        self.shared.table.capacity()
    }

    /// Configuration the driver was created with.
    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// Hardware-access lock shared with other families on the accelerator.
    pub fn access_lock(&self) -> &AccessLock {
        &self.shared.access
    }

    /// Power manager.
    pub fn power(&self) -> &P {
        &self.shared.power
    }

    /// Secure channel.
    pub fn channel(&self) -> &C {
        &self.shared.channel
    }

    /// Number of operations dispatched and not yet completed, across handles.
    pub fn operations_in_flight(&self) -> usize {
        self.shared.table.in_flight()
    }

    /// True if an operation is dispatched on `handle` and not yet completed.
    pub fn is_in_flight(&self, handle: &Handle) -> bool {
        self.shared.table.get(handle.id).is_ok_and(|entry| entry.relay.is_armed())
    }

    fn ensure_initialized(&self) -> Result<(), DriverError> {
        if self.shared.gate.is_initialized() {
            Ok(())
        } else {
            Err(DriverError::NotInitialized { family: F::NAME })
        }
    }

    fn call(
        &self,
        msg_type: F::MsgType,
        message: &mut Message<'_, F>,
        outvec: OutVec<'_>,
    ) -> Result<(), crate::error::ChannelError> {
        let len = message.len();
        tracing::trace!(
            family = F::NAME,
            code = msg_type.code(),
            message = message.name(),
            "secure call"
        );
        self.shared.channel.call(msg_type, InVec::with_len(message, len), outvec)
    }

    fn request_handle(
        &self,
        msg_type: F::MsgType,
        mut message: Message<'_, F>,
    ) -> Result<HandleId, DriverError> {
        let mut word: Word = 0;
        self.call(msg_type, &mut message, OutVec::word(&mut word))?;

        HandleId::from_word_for(word, F::ID).map_err(|error| {
            tracing::debug!(family = F::NAME, %error, "open refused");
            DriverError::OpenRejected { family: F::NAME }
        })
    }

    fn attach(&self, handle: HandleId, params: Params<F>) -> Result<Handle, DriverError> {
        let relay = Arc::new(Relay::new(
            handle,
            &params.return_behavior,
            self.shared.power.clone(),
            self.shared.access.clone(),
        ));

        let needs_relay = !matches!(params.return_behavior, ReturnBehavior::Polling)
            || F::POLLING == PollingCompletion::Relayed;
        if needs_relay {
            let callback: Arc<dyn SecureCallback<F>> = relay.clone();
            let mut message = Message::RegisterCallback(CallbackMsg { handle, callback });
            let msg_type = <F::MsgType as MessageType>::REGISTER_CALLBACK;
            if let Err(source) = self.call(msg_type, &mut message, OutVec::none()) {
                tracing::warn!(
                    family = F::NAME,
                    %handle,
                    %source,
                    "registration failed, secure handle leaked"
                );
                return Err(DriverError::RegistrationFailed { handle, source });
            }
        }

        let entry = Entry {
            handle,
            timeout: params.effective_timeout(),
            behavior: params.return_behavior,
            relay,
        };
        let behavior = entry.behavior.name();
        if let Err(error) = self.shared.table.insert(entry) {
            let mut message = Message::Close(CloseMsg { handle });
            let msg_type = <F::MsgType as MessageType>::CLOSE;
            if let Err(source) = self.call(msg_type, &mut message, OutVec::none()) {
                tracing::warn!(
                    family = F::NAME,
                    %handle,
                    %source,
                    "refused handle not closed, secure handle leaked"
                );
            }
            return Err(error);
        }

        if F::DEPENDENCY == DependencyScope::PerHandle {
            if let Err(error) = self.shared.power.set_dependency(F::RESOURCE) {
                tracing::warn!(family = F::NAME, %handle, %error, "power dependency not taken");
            }
        }

        tracing::debug!(family = F::NAME, %handle, behavior, "handle opened");
        Ok(Handle { id: handle })
    }

    fn release_handle_dependency(&self) {
        if F::DEPENDENCY == DependencyScope::PerHandle {
            if let Err(error) = self.shared.power.release_dependency(F::RESOURCE) {
                tracing::warn!(family = F::NAME, %error, "power dependency release failed");
            }
        }
    }

    /// Take the lock and constraint an operation needs and queue it on the relay.
    fn begin(
        &self,
        entry: &Entry<F, P>,
        sender: Option<oneshot::Sender<Notification<F>>>,
    ) -> Result<Ticket<F>, DriverError> {
        let exclusive = F::SERIALIZATION == Serialization::Exclusive;
        if exclusive && !self.shared.access.acquire(entry.timeout) {
            tracing::debug!(family = F::NAME, handle = %entry.handle, "access lock unavailable");
            return Err(DriverError::ResourceUnavailable);
        }

        let constraint = !matches!(entry.behavior, ReturnBehavior::Polling)
            && self
                .shared
                .power
                .set_constraint(Constraint::DisallowStandby)
                .inspect_err(|error| {
                    tracing::warn!(family = F::NAME, %error, "standby constraint not taken");
                })
                .is_ok();

        Ok(entry.relay.arm(exclusive, constraint, sender))
    }

    fn send_operation(
        &self,
        entry: &Entry<F, P>,
        msg_type: F::MsgType,
        kind: OperationKind,
        operation: &mut F::Operation,
    ) -> Result<Status, crate::error::ChannelError> {
        let mut word = Status::ERROR.to_word();
        let mut message = Message::operation(kind, entry.handle, operation);
        self.call(msg_type, &mut message, OutVec::word(&mut word))?;
        Ok(Status::from_word(word))
    }

    /// Complete a rejected dispatch on the calling thread.
    fn settle(
        &self,
        entry: &Entry<F, P>,
        ticket: &Ticket<F>,
        sent: Result<Status, crate::error::ChannelError>,
    ) -> Result<(), DriverError> {
        match sent {
            Ok(status) if status.is_success() => Ok(()),
            Ok(status) => {
                entry.relay.disarm(ticket);
                tracing::debug!(
                    family = F::NAME,
                    handle = %entry.handle,
                    %status,
                    "operation rejected"
                );
                Err(DriverError::Failed(status))
            },
            Err(error) => {
                entry.relay.disarm(ticket);
                tracing::warn!(
                    family = F::NAME,
                    handle = %entry.handle,
                    %error,
                    "operation not delivered"
                );
                Err(DriverError::Channel(error))
            },
        }
    }

    fn wait_for_result(
        &self,
        entry: &Entry<F, P>,
        ticket: &Ticket<F>,
        operation: &mut F::Operation,
    ) -> Result<Completion, DriverError> {
        match entry.behavior {
            ReturnBehavior::Polling if F::POLLING == PollingCompletion::Synchronous => {
                entry.relay.disarm(ticket);
                Ok(Completion::Done)
            },
            ReturnBehavior::Polling => {
                entry.relay.spin_until_done(ticket);
                finish(entry, ticket, operation)
            },
            ReturnBehavior::Blocking => {
                entry.relay.pend_until_done(ticket);
                finish(entry, ticket, operation)
            },
            ReturnBehavior::Callback(_) | ReturnBehavior::Async => Ok(Completion::Pending),
        }
    }
}

fn wire_params<F: Family>(params: &Params<F>) -> WireParams<'_, F> {
    WireParams {
        return_mode: params.return_behavior.mode(),
        timeout: params.effective_timeout(),
        custom: &params.custom,
    }
}

fn check(status: Status) -> Result<(), DriverError> {
    if status.is_success() { Ok(()) } else { Err(DriverError::Failed(status)) }
}

/// Read the relay's stored result back into the caller's operation.
fn finish<F: Family, P: PowerManager>(
    entry: &Entry<F, P>,
    ticket: &Ticket<F>,
    operation: &mut F::Operation,
) -> Result<Completion, DriverError> {
    let Some(notification) = entry.relay.take_result(ticket) else {
        tracing::warn!(family = F::NAME, handle = %entry.handle, "woken without a result");
        return Err(DriverError::Failed(Status::ERROR));
    };
    if let Some(updated) = notification.operation {
        *operation = updated;
    }
    check(notification.status).map(|()| Completion::Done)
}
