//! Resource-accounting invariants.
//!
//! A [`BridgeSnapshot`] captures what the drivers, the shared access lock and
//! the power manager are holding at one instant. Each [`Invariant`] inspects a
//! snapshot and reports a [`Violation`] if the counts cannot be explained by
//! the operations still in flight.
//!
//! Snapshots are only meaningful while the bridge is quiescent: take them
//! after every thread has returned and every held completion has been
//! delivered.
//!
//! ```ignore
//! let snapshot = BridgeSnapshot::of_driver(driver.inner());
//! InvariantRegistry::standard().check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    ConstraintBalance, DependencyBalance, LockReleasedWhenIdle, MutualExclusion,
    NoSpuriousRelease,
};
pub use snapshot::{BridgeSnapshot, FamilySnapshot};

/// Outcome of one invariant check.
pub type InvariantResult = Result<(), Violation>;

/// A failed invariant and what it saw.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Invariant name
    pub invariant: &'static str,
    /// Observed counts
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Property of a quiescent bridge.
pub trait Invariant: Send + Sync {
    /// Name used in violations.
    fn name(&self) -> &'static str;

    /// Inspect `state`.
    fn check(&self, state: &BridgeSnapshot) -> InvariantResult;
}

/// Ordered set of invariants run together.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Registry with no invariants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock, constraint, dependency, exclusion and double-release checks.
    pub fn standard() -> Self {
        Self::new()
            .with(LockReleasedWhenIdle)
            .with(ConstraintBalance)
            .with(DependencyBalance)
            .with(MutualExclusion)
            .with(NoSpuriousRelease)
    }

    /// Append `invariant`.
    #[must_use]
    pub fn with<I: Invariant + 'static>(mut self, invariant: I) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Run every invariant and collect all violations.
    pub fn check_all(&self, state: &BridgeSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|invariant| invariant.check(state).err()).collect();
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Panic listing every violation, prefixed with `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &BridgeSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let lines: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("{context}: {}", lines.join("; "));
        }
    }

    /// Names of the registered invariants, in run order.
    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|invariant| invariant.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_runs_in_order() {
        assert_eq!(
            InvariantRegistry::standard().names(),
            [
                "lock_released_when_idle",
                "constraint_balance",
                "dependency_balance",
                "mutual_exclusion",
                "no_spurious_release",
            ]
        );
    }

    #[test]
    fn idle_bridge_satisfies_everything() {
        assert!(InvariantRegistry::standard().check_all(&BridgeSnapshot::empty()).is_ok());
    }
}
