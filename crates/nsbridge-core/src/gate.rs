//! Initialization gate.
//!
//! The initialized flag is read and written inside a critical section, never
//! under a blocking lock: `init` may race with interrupt-context callers on
//! target hardware, where the critical section masks interrupts. On a host
//! build the `std` implementation of `critical-section` provides a global
//! reentrant lock instead.

use std::{cell::Cell, fmt};

use critical_section::Mutex;

/// Run-once gate guarding a driver family's initialization.
pub struct InitGate {
    initialized: Mutex<Cell<bool>>,
}

impl fmt::Debug for InitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitGate").field("initialized", &self.is_initialized()).finish()
    }
}

impl Default for InitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InitGate {
    /// Create a closed gate.
    pub const fn new() -> Self {
        Self { initialized: Mutex::new(Cell::new(false)) }
    }

    /// Run `f` if the gate is still closed, then open it.
    ///
    /// Returns true if this call ran `f`. `f` runs inside the critical
    /// section, so it must not block.
    pub fn initialize(&self, f: impl FnOnce()) -> bool {
        critical_section::with(|cs| {
            let flag = self.initialized.borrow(cs);
            if flag.get() {
                return false;
            }
            f();
            flag.set(true);
            true
        })
    }

    /// True once [`InitGate::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.initialized.borrow(cs).get())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    #[test]
    fn runs_exactly_once() {
        let gate = InitGate::new();
        let runs = AtomicUsize::new(0);

        assert!(gate.initialize(|| {
            runs.fetch_add(1, Ordering::Relaxed);
        }));
        assert!(!gate.initialize(|| {
            runs.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(gate.is_initialized());
    }

    #[test]
    fn concurrent_initializers_run_once() {
        let gate = Arc::new(InitGate::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    gate.initialize(|| {
                        runs.fetch_add(1, Ordering::Relaxed);
                    });
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }
}
