//! Blocking primitives used by the dispatcher.
//!
//! Both primitives are binary semaphores that may be released by a thread
//! other than the one that acquired them. The hardware-access lock is taken by
//! the dispatching thread and released by whichever context observes the
//! operation's completion.

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

/// How long an acquisition may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Fail immediately if unavailable
    #[default]
    NoWait,
    /// Wait up to the given duration
    After(Duration),
    /// Wait indefinitely
    Forever,
}

/// Wait on `cv` while `blocked(*guard)` holds.
///
/// Returns the guard once unblocked, or `None` if the timeout expired first.
fn wait_while<'a>(
    cv: &Condvar,
    mut guard: MutexGuard<'a, bool>,
    timeout: Timeout,
    blocked: impl Fn(bool) -> bool,
) -> Option<MutexGuard<'a, bool>> {
    match timeout {
        Timeout::NoWait => {
            if blocked(*guard) {
                return None;
            }
        },
        Timeout::After(limit) => {
            let deadline = Instant::now() + limit;
            while blocked(*guard) {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                #[allow(clippy::expect_used)]
                let (next, _) =
                    cv.wait_timeout(guard, deadline - now).expect("semaphore mutex poisoned");
                guard = next;
            }
        },
        Timeout::Forever => {
            while blocked(*guard) {
                #[allow(clippy::expect_used)]
                let next = cv.wait(guard).expect("semaphore mutex poisoned");
                guard = next;
            }
        },
    }
    Some(guard)
}

/// Counters kept by [`AccessLock`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: usize,
    /// Releases of a held lock
    pub releases: usize,
    /// Acquisitions that gave up at the timeout
    pub timeouts: usize,
    /// Releases of a lock nobody held
    pub spurious_releases: usize,
}

#[derive(Debug, Default)]
struct LockInner {
    held: Mutex<bool>,
    cv: Condvar,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    timeouts: AtomicUsize,
    spurious_releases: AtomicUsize,
}

/// Shared hardware-access lock of one accelerator.
///
/// Clones refer to the same lock, so several driver families can serialize
/// on one accelerator by sharing a clone.
#[derive(Debug, Clone, Default)]
pub struct AccessLock {
    inner: Arc<LockInner>,
}

impl AccessLock {
    /// Create an unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock within `timeout`. Returns true on success.
    pub fn acquire(&self, timeout: Timeout) -> bool {
        #[allow(clippy::expect_used)]
        let guard = self.inner.held.lock().expect("access lock mutex poisoned");

        match wait_while(&self.inner.cv, guard, timeout, |held| held) {
            Some(mut held) => {
                *held = true;
                self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
                true
            },
            None => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                false
            },
        }
    }

    /// Release the lock. May be called from any thread.
    ///
    /// Releasing an unheld lock is counted and ignored.
    pub fn release(&self) {
        #[allow(clippy::expect_used)]
        let mut held = self.inner.held.lock().expect("access lock mutex poisoned");
        if !*held {
            self.inner.spurious_releases.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("release of unheld access lock");
            return;
        }
        *held = false;
        self.inner.releases.fetch_add(1, Ordering::Relaxed);
        drop(held);
        self.inner.cv.notify_one();
    }

    /// True while some operation holds the lock.
    pub fn is_held(&self) -> bool {
        #[allow(clippy::expect_used)]
        let held = self.inner.held.lock().expect("access lock mutex poisoned");
        *held
    }

    /// Snapshot of the lock's counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            releases: self.inner.releases.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            spurious_releases: self.inner.spurious_releases.load(Ordering::Relaxed),
        }
    }
}

/// Binary semaphore a blocked caller pends on until its completion is posted.
#[derive(Debug, Default)]
pub struct Semaphore {
    available: Mutex<bool>,
    cv: Condvar,
}

impl Semaphore {
    /// Create an empty semaphore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the semaphore available and wake one waiter.
    pub fn post(&self) {
        #[allow(clippy::expect_used)]
        let mut available = self.available.lock().expect("semaphore mutex poisoned");
        *available = true;
        drop(available);
        self.cv.notify_one();
    }

    /// Consume the semaphore, waiting up to `timeout`. Returns true on success.
    pub fn pend(&self, timeout: Timeout) -> bool {
        #[allow(clippy::expect_used)]
        let guard = self.available.lock().expect("semaphore mutex poisoned");

        match wait_while(&self.cv, guard, timeout, |available| !available) {
            Some(mut available) => {
                *available = false;
                true
            },
            None => false,
        }
    }
}
