//! Standard invariant checks.
//!
//! These invariants capture resource-accounting properties that must hold
//! whenever the bridge is quiescent, whatever sequence of dispatches, failures
//! and cancellations led there.

use super::{BridgeSnapshot, Invariant, InvariantResult, Violation};

/// The access lock is free when nothing is in flight.
///
/// A held lock with no operation outstanding means some completion path
/// skipped its release and the accelerator is wedged.
pub struct LockReleasedWhenIdle;

impl Invariant for LockReleasedWhenIdle {
    fn name(&self) -> &'static str {
        "lock_released_when_idle"
    }

    fn check(&self, state: &BridgeSnapshot) -> InvariantResult {
        if state.in_flight() == 0 && state.lock_held {
            return Err(Violation {
                invariant: self.name(),
                message: format!("lock held with no operation in flight ({:?})", state.lock),
            });
        }
        Ok(())
    }
}

/// Every standby constraint belongs to an in-flight operation.
pub struct ConstraintBalance;

impl Invariant for ConstraintBalance {
    fn name(&self) -> &'static str {
        "constraint_balance"
    }

    fn check(&self, state: &BridgeSnapshot) -> InvariantResult {
        let in_flight = state.in_flight();
        if state.standby_constraints > in_flight {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} standby constraints outstanding for {} in-flight operations",
                    state.standby_constraints, in_flight
                ),
            });
        }
        Ok(())
    }
}

/// Dependency references match open handles.
///
/// Per-handle families hold one reference per open handle; init-scoped
/// families hold one once initialized.
pub struct DependencyBalance;

impl Invariant for DependencyBalance {
    fn name(&self) -> &'static str {
        "dependency_balance"
    }

    fn check(&self, state: &BridgeSnapshot) -> InvariantResult {
        for &(resource, count) in &state.dependencies {
            let expected = state.expected_dependencies(resource);
            if count != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: {count} references, open handles account for {expected}",
                        resource.name()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// At most one operation occupies the accelerator at a time.
pub struct MutualExclusion;

impl Invariant for MutualExclusion {
    fn name(&self) -> &'static str {
        "mutual_exclusion"
    }

    fn check(&self, state: &BridgeSnapshot) -> InvariantResult {
        if state.max_concurrent > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{} operations ran concurrently", state.max_concurrent),
            });
        }
        Ok(())
    }
}

/// Nothing was released more often than it was taken.
pub struct NoSpuriousRelease;

impl Invariant for NoSpuriousRelease {
    fn name(&self) -> &'static str {
        "no_spurious_release"
    }

    fn check(&self, state: &BridgeSnapshot) -> InvariantResult {
        if state.lock.spurious_releases > 0 || state.power.underflows > 0 {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} lock releases while free, {} power underflows",
                    state.lock.spurious_releases, state.power.underflows
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nsbridge_core::{DependencyScope, LockStats, Resource};

    use super::*;
    use crate::invariants::FamilySnapshot;

    fn family(open_handles: usize, in_flight: usize) -> FamilySnapshot {
        FamilySnapshot {
            name: "TEST",
            resource: Resource::Crypto,
            scope: DependencyScope::PerHandle,
            initialized: true,
            open_handles,
            in_flight,
        }
    }

    #[test]
    fn held_lock_while_idle_is_flagged() {
        let state =
            BridgeSnapshot { lock_held: true, families: vec![family(1, 0)], ..Default::default() };
        assert!(LockReleasedWhenIdle.check(&state).is_err());

        let busy =
            BridgeSnapshot { lock_held: true, families: vec![family(1, 1)], ..Default::default() };
        assert!(LockReleasedWhenIdle.check(&busy).is_ok());
    }

    #[test]
    fn leaked_constraint_is_flagged() {
        let state = BridgeSnapshot {
            standby_constraints: 1,
            families: vec![family(1, 0)],
            ..Default::default()
        };
        let violation = ConstraintBalance.check(&state).unwrap_err();
        assert_eq!(violation.invariant, "constraint_balance");
    }

    #[test]
    fn dependency_mismatch_is_flagged() {
        let state = BridgeSnapshot {
            dependencies: vec![(Resource::Crypto, 1)],
            families: vec![family(2, 0)],
            ..Default::default()
        };
        assert!(DependencyBalance.check(&state).is_err());
    }

    #[test]
    fn init_scoped_family_accounts_for_one_reference() {
        let mut trng = family(3, 0);
        trng.resource = Resource::Trng;
        trng.scope = DependencyScope::AtInit;
        let state = BridgeSnapshot {
            dependencies: vec![(Resource::Trng, 1)],
            families: vec![trng],
            ..Default::default()
        };
        assert!(DependencyBalance.check(&state).is_ok());
    }

    #[test]
    fn spurious_release_is_flagged() {
        let lock = LockStats { spurious_releases: 1, ..LockStats::default() };
        let state = BridgeSnapshot { lock, ..Default::default() };
        assert!(NoSpuriousRelease.check(&state).is_err());
    }
}
