//! Completion relay.
//!
//! The secure side finishes asynchronous operations from its own interrupt
//! context and reports them by posting a [`Notification`] to the relay it was
//! given at registration. The relay releases what the dispatch took and then
//! wakes the caller according to the handle's completion strategy.
//!
//! # Operation Lifecycle
//!
//! ```text
//!            arm()                  post() / disarm()
//!   Idle ───────────► Dispatched ────────────────────► Completed
//!    ▲                   │                                 │
//!    │                   │ release lock + constraint       │
//!    └───────────────────┴─────────────────────────────────┘
//!                        (exactly once per dispatch)
//! ```
//!
//! Each dispatch is a [`Ticket`] in the relay's FIFO. Families serialized by
//! the access lock have at most one ticket outstanding per handle; families
//! whose secure side queues requests (TRNG) may have several, completed in
//! the order they were dispatched. Completions are matched to tickets by that
//! order alone, so operations stacked on one handle are dispatched from one
//! thread.
//!
//! # Invariants
//!
//! - A ticket is removed from the FIFO exactly once, by whichever of the
//!   trampoline (oldest ticket) or the synchronous failure path (its own
//!   ticket) gets there first. Only the remover releases the ticket's lock
//!   and constraint.
//! - A notification that arrives with no ticket outstanding is dropped.

use std::{
    collections::VecDeque,
    fmt, hint,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use nsbridge_proto::{HandleId, Status};
use tokio::sync::oneshot;

use crate::{
    config::{CallbackFxn, ReturnBehavior},
    family::Family,
    power::{Constraint, PowerManager},
    sync::{AccessLock, Semaphore, Timeout},
};

/// Completion report posted by the secure side.
pub struct Notification<F: Family> {
    /// Handle the operation ran on
    pub handle: HandleId,
    /// Final driver status
    pub status: Status,
    /// Message type of the completed operation
    pub kind: F::MsgType,
    /// Operation struct as the secure side left it
    pub operation: Option<F::Operation>,
}

impl<F: Family> Clone for Notification<F> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            status: self.status,
            kind: self.kind,
            operation: self.operation.clone(),
        }
    }
}

impl<F: Family> fmt::Debug for Notification<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .field("kind", &self.kind)
            .field("operation", &self.operation)
            .finish()
    }
}

/// Object the secure side posts completions to.
pub trait SecureCallback<F: Family>: Send + Sync {
    /// Deliver a completion. Runs in the secure side's completion context.
    fn post(&self, notification: Notification<F>);
}

enum CompletionStrategy<F: Family> {
    Poll,
    Block,
    Callback(CallbackFxn<F>),
    Future,
}

/// Where the trampoline leaves one dispatch's result for its caller.
struct Landing<F: Family> {
    done: AtomicBool,
    wake: Semaphore,
    result: Mutex<Option<Notification<F>>>,
}

/// One dispatched operation, as seen by the thread that dispatched it.
pub(crate) struct Ticket<F: Family> {
    id: u64,
    landing: Arc<Landing<F>>,
}

struct Outstanding<F: Family> {
    id: u64,
    holds_lock: bool,
    holds_constraint: bool,
    landing: Arc<Landing<F>>,
    sender: Option<oneshot::Sender<Notification<F>>>,
}

/// Per-handle relay between the secure side and the waiting callers.
pub struct Relay<F: Family, P> {
    handle: HandleId,
    strategy: CompletionStrategy<F>,
    power: P,
    access: AccessLock,
    next_ticket: AtomicU64,
    outstanding: Mutex<VecDeque<Outstanding<F>>>,
    live: AtomicBool,
}

impl<F: Family, P: PowerManager> Relay<F, P> {
    /// Relay for `handle` completing according to `behavior`.
    pub fn new(
        handle: HandleId,
        behavior: &ReturnBehavior<F>,
        power: P,
        access: AccessLock,
    ) -> Self {
        let strategy = match behavior {
            ReturnBehavior::Polling => CompletionStrategy::Poll,
            ReturnBehavior::Blocking => CompletionStrategy::Block,
            ReturnBehavior::Callback(f) => CompletionStrategy::Callback(f.clone()),
            ReturnBehavior::Async => CompletionStrategy::Future,
        };
        Self {
            handle,
            strategy,
            power,
            access,
            next_ticket: AtomicU64::new(0),
            outstanding: Mutex::new(VecDeque::new()),
            live: AtomicBool::new(true),
        }
    }

    /// Handle this relay serves.
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// True while at least one operation is dispatched and not yet completed.
    pub fn is_armed(&self) -> bool {
        !self.lock_outstanding().is_empty()
    }

    /// Operations dispatched and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.lock_outstanding().len()
    }

    /// Queue a new operation that holds the given resources.
    ///
    /// Must be called after the lock and constraint were taken and before the
    /// secure call is made. `sender` receives the completion on async handles.
    pub(crate) fn arm(
        &self,
        holds_lock: bool,
        holds_constraint: bool,
        sender: Option<oneshot::Sender<Notification<F>>>,
    ) -> Ticket<F> {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let landing = Arc::new(Landing {
            done: AtomicBool::new(false),
            wake: Semaphore::new(),
            result: Mutex::new(None),
        });
        self.lock_outstanding().push_back(Outstanding {
            id,
            holds_lock,
            holds_constraint,
            landing: Arc::clone(&landing),
            sender,
        });
        Ticket { id, landing }
    }

    /// Complete `ticket` synchronously, releasing what it holds.
    ///
    /// Returns false if the trampoline already completed it.
    pub(crate) fn disarm(&self, ticket: &Ticket<F>) -> bool {
        let removed = {
            let mut outstanding = self.lock_outstanding();
            let position = outstanding.iter().position(|entry| entry.id == ticket.id);
            position.and_then(|position| outstanding.remove(position))
        };
        match removed {
            Some(entry) => {
                self.release(&entry);
                true
            },
            None => false,
        }
    }

    /// Busy-wait until the trampoline reports `ticket` complete.
    pub(crate) fn spin_until_done(&self, ticket: &Ticket<F>) {
        while !ticket.landing.done.load(Ordering::Acquire) {
            hint::spin_loop();
        }
    }

    /// Pend until the trampoline posts `ticket`'s completion.
    pub(crate) fn pend_until_done(&self, ticket: &Ticket<F>) {
        ticket.landing.wake.pend(Timeout::Forever);
    }

    /// Result stored by the trampoline for polling and blocking handles.
    pub(crate) fn take_result(&self, ticket: &Ticket<F>) -> Option<Notification<F>> {
        lock_result(&ticket.landing).take()
    }

    /// Stop delivering completions. Pending futures resolve as disconnected.
    pub(crate) fn destruct(&self) {
        self.live.store(false, Ordering::Release);
        for entry in self.lock_outstanding().iter_mut() {
            entry.sender = None;
        }
    }

    fn release(&self, entry: &Outstanding<F>) {
        if entry.holds_constraint {
            if let Err(error) = self.power.release_constraint(Constraint::DisallowStandby) {
                tracing::warn!(handle = %self.handle, %error, "constraint release failed");
            }
        }
        if entry.holds_lock {
            self.access.release();
        }
    }

    fn lock_outstanding(&self) -> MutexGuard<'_, VecDeque<Outstanding<F>>> {
        #[allow(clippy::expect_used)]
        self.outstanding.lock().expect("relay queue mutex poisoned")
    }
}

fn lock_result<F: Family>(landing: &Landing<F>) -> MutexGuard<'_, Option<Notification<F>>> {
    #[allow(clippy::expect_used)]
    landing.result.lock().expect("relay result mutex poisoned")
}

impl<F: Family, P: PowerManager> SecureCallback<F> for Relay<F, P> {
    fn post(&self, notification: Notification<F>) {
        let oldest = self.lock_outstanding().pop_front();
        let Some(mut entry) = oldest else {
            tracing::warn!(
                handle = %self.handle,
                status = %notification.status,
                "unsolicited completion dropped"
            );
            return;
        };
        self.release(&entry);

        if !self.live.load(Ordering::Acquire) {
            tracing::debug!(handle = %self.handle, "completion after close dropped");
            return;
        }

        tracing::trace!(handle = %self.handle, status = %notification.status, "completion relayed");
        let landing = &entry.landing;
        match &self.strategy {
            CompletionStrategy::Poll => {
                *lock_result(landing) = Some(notification);
                landing.done.store(true, Ordering::Release);
            },
            CompletionStrategy::Block => {
                *lock_result(landing) = Some(notification);
                landing.wake.post();
            },
            CompletionStrategy::Callback(f) => f(notification),
            CompletionStrategy::Future => {
                if let Some(sender) = entry.sender.take() {
                    // receiver dropped means the caller stopped waiting
                    let _ = sender.send(notification);
                }
            },
        }
    }
}

impl<F: Family, P> fmt::Debug for Relay<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("handle", &self.handle)
            .field("live", &self.live.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::AtomicUsize};

    use nsbridge_proto::{FamilyId, MessageType};

    use super::*;
    use crate::power::{RefCountPower, Resource};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestMsg {
        Open,
        Construct,
        Close,
        Register,
        Cancel,
        Run,
    }

    impl MessageType for TestMsg {
        const FAMILY: &'static str = "TEST";
        const OPEN: Self = Self::Open;
        const CONSTRUCT: Self = Self::Construct;
        const CLOSE: Self = Self::Close;
        const REGISTER_CALLBACK: Self = Self::Register;
        const CANCEL_OPERATION: Self = Self::Cancel;

        fn code(self) -> u8 {
            self as u8
        }

        fn from_code(code: u8) -> Option<Self> {
            [Self::Open, Self::Construct, Self::Close, Self::Register, Self::Cancel, Self::Run]
                .into_iter()
                .find(|msg| msg.code() == code)
        }
    }

    struct TestFamily;

    impl Family for TestFamily {
        const NAME: &'static str = "TEST";
        const ID: FamilyId = FamilyId::AES_ECB;
        const RESOURCE: Resource = Resource::Crypto;
        type MsgType = TestMsg;
        type Operation = u32;
        type Params = ();
    }

    fn handle() -> HandleId {
        HandleId::new(FamilyId::AES_ECB, 0, 0)
    }

    fn notification(status: Status) -> Notification<TestFamily> {
        Notification { handle: handle(), status, kind: TestMsg::Run, operation: Some(9) }
    }

    fn armed_relay(
        behavior: &ReturnBehavior<TestFamily>,
    ) -> (Relay<TestFamily, RefCountPower>, Ticket<TestFamily>, RefCountPower, AccessLock) {
        let power = RefCountPower::new();
        let access = AccessLock::new();
        let relay = Relay::new(handle(), behavior, power.clone(), access.clone());

        assert!(access.acquire(Timeout::NoWait));
        power.set_constraint(Constraint::DisallowStandby).unwrap();
        let ticket = relay.arm(true, true, None);
        (relay, ticket, power, access)
    }

    #[test]
    fn post_releases_lock_and_constraint() {
        let (relay, ticket, power, access) = armed_relay(&ReturnBehavior::Blocking);

        relay.post(notification(Status::SUCCESS));

        assert!(!access.is_held());
        assert_eq!(power.constraint_count(Constraint::DisallowStandby), 0);
        assert_eq!(relay.take_result(&ticket).map(|n| n.operation), Some(Some(9)));
    }

    #[test]
    fn second_post_releases_nothing() {
        let (relay, _, power, access) = armed_relay(&ReturnBehavior::Blocking);

        relay.post(notification(Status::SUCCESS));
        relay.post(notification(Status::SUCCESS));

        assert_eq!(access.stats().releases, 1);
        assert_eq!(access.stats().spurious_releases, 0);
        assert_eq!(power.stats().constraint_releases, 1);
        assert_eq!(power.stats().underflows, 0);
    }

    #[test]
    fn disarm_after_post_is_noop() {
        let (relay, ticket, power, access) = armed_relay(&ReturnBehavior::Blocking);

        relay.post(notification(Status::CANCELED));
        assert!(!relay.disarm(&ticket));

        assert_eq!(access.stats().releases, 1);
        assert_eq!(power.stats().constraint_releases, 1);
    }

    #[test]
    fn callback_receives_notification() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let behavior = ReturnBehavior::callback(move |n: Notification<TestFamily>| {
            assert_eq!(n.status, Status::ERROR);
            sink.fetch_add(1, Ordering::Relaxed);
        });
        let (relay, _, _, access) = armed_relay(&behavior);

        relay.post(notification(Status::ERROR));

        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert!(!access.is_held());
    }

    #[test]
    fn polling_flag_set_by_post() {
        let (relay, ticket, _, _) = armed_relay(&ReturnBehavior::Polling);

        relay.post(notification(Status::SUCCESS));
        relay.spin_until_done(&ticket);

        assert!(relay.take_result(&ticket).is_some());
    }

    #[test]
    fn closed_relay_still_releases() {
        let (relay, ticket, power, access) = armed_relay(&ReturnBehavior::Blocking);

        relay.destruct();
        relay.post(notification(Status::SUCCESS));

        assert!(!access.is_held());
        assert_eq!(power.constraint_count(Constraint::DisallowStandby), 0);
        assert!(relay.take_result(&ticket).is_none());
    }

    #[test]
    fn queued_dispatches_each_get_one_completion() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let behavior = ReturnBehavior::callback(move |_: Notification<TestFamily>| {
            sink.fetch_add(1, Ordering::Relaxed);
        });
        let power = RefCountPower::new();
        let relay = Relay::new(handle(), &behavior, power.clone(), AccessLock::new());

        for _ in 0..3 {
            power.set_constraint(Constraint::DisallowStandby).unwrap();
            relay.arm(false, true, None);
        }
        assert_eq!(relay.in_flight(), 3);

        for _ in 0..4 {
            relay.post(notification(Status::SUCCESS));
        }

        assert_eq!(seen.load(Ordering::Relaxed), 3);
        assert_eq!(relay.in_flight(), 0);
        assert_eq!(power.constraint_count(Constraint::DisallowStandby), 0);
        assert_eq!(power.stats().underflows, 0);
    }

    #[test]
    fn completions_land_in_dispatch_order() {
        let behavior = ReturnBehavior::<TestFamily>::Blocking;
        let relay = Relay::new(handle(), &behavior, RefCountPower::new(), AccessLock::new());
        let first = relay.arm(false, false, None);
        let second = relay.arm(false, false, None);

        relay.post(Notification { operation: Some(1), ..notification(Status::SUCCESS) });
        relay.post(Notification { operation: Some(2), ..notification(Status::SUCCESS) });

        relay.pend_until_done(&second);
        assert_eq!(relay.take_result(&first).and_then(|n| n.operation), Some(1));
        assert_eq!(relay.take_result(&second).and_then(|n| n.operation), Some(2));
    }

    #[test]
    fn disarm_skips_the_older_dispatch() {
        let (relay, first, power, access) = armed_relay(&ReturnBehavior::Blocking);
        power.set_constraint(Constraint::DisallowStandby).unwrap();
        let second = relay.arm(false, true, None);

        assert!(relay.disarm(&second));
        assert!(relay.is_armed());
        assert!(access.is_held());

        relay.post(notification(Status::SUCCESS));
        assert!(relay.take_result(&first).is_some());
        assert!(!access.is_held());
        assert_eq!(power.constraint_count(Constraint::DisallowStandby), 0);
    }

    #[tokio::test]
    async fn future_resolves_on_post() {
        let power = RefCountPower::new();
        let relay = Relay::new(handle(), &ReturnBehavior::Async, power, AccessLock::new());
        let (tx, rx) = oneshot::channel();
        relay.arm(false, false, Some(tx));

        relay.post(notification(Status::SUCCESS));

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.operation, Some(9));
    }
}
