//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of one accelerator's drivers at a
//! point in time. Invariants operate on snapshots rather than live state so a
//! check sees one consistent picture.

use nsbridge_core::{
    AccessLock, Constraint, DependencyScope, Driver, Family, LockStats, PowerStats,
    RefCountPower, Resource, SecureChannel,
};

/// Snapshot of the drivers sharing one lock and power manager.
#[derive(Debug, Clone, Default)]
pub struct BridgeSnapshot {
    /// Whether the access lock is currently held.
    pub lock_held: bool,
    /// Access lock counters.
    pub lock: LockStats,
    /// Power manager counters.
    pub power: PowerStats,
    /// Outstanding standby constraints.
    pub standby_constraints: usize,
    /// Outstanding dependency references per resource.
    pub dependencies: Vec<(Resource, usize)>,
    /// Per-family driver state.
    pub families: Vec<FamilySnapshot>,
    /// Most operations the accelerator ever ran at once.
    pub max_concurrent: usize,
}

/// Snapshot of one family's driver.
#[derive(Debug, Clone)]
pub struct FamilySnapshot {
    /// Family name.
    pub name: &'static str,
    /// Power resource the family depends on.
    pub resource: Resource,
    /// When the family takes its dependency.
    pub scope: DependencyScope,
    /// Whether `init` has run.
    pub initialized: bool,
    /// Open handles.
    pub open_handles: usize,
    /// Operations dispatched and not yet completed.
    pub in_flight: usize,
}

impl BridgeSnapshot {
    /// Create an empty snapshot (no families).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of a single driver and the lock and power manager it uses.
    pub fn of_driver<F: Family, C: SecureChannel<F>>(driver: &Driver<F, C, RefCountPower>) -> Self {
        let mut snapshot = Self::empty();
        snapshot.capture_shared(driver.access_lock(), driver.power());
        snapshot.add_family(driver);
        snapshot
    }

    /// Record the shared lock and power state.
    pub fn capture_shared(&mut self, lock: &AccessLock, power: &RefCountPower) {
        self.lock_held = lock.is_held();
        self.lock = lock.stats();
        self.power = power.stats();
        self.standby_constraints = power.constraint_count(Constraint::DisallowStandby);
        self.dependencies = [Resource::Crypto, Resource::Trng, Resource::Pka]
            .into_iter()
            .map(|resource| (resource, power.dependency_count(resource)))
            .collect();
    }

    /// Add one family's driver state.
    pub fn add_family<F, C>(&mut self, driver: &Driver<F, C, RefCountPower>)
    where
        F: Family,
        C: SecureChannel<F>,
    {
        self.families.push(FamilySnapshot {
            name: F::NAME,
            resource: F::RESOURCE,
            scope: F::DEPENDENCY,
            initialized: driver.is_initialized(),
            open_handles: driver.open_handles(),
            in_flight: driver.operations_in_flight(),
        });
    }

    /// Record the accelerator's peak occupancy.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Operations in flight across all families.
    pub fn in_flight(&self) -> usize {
        self.families.iter().map(|family| family.in_flight).sum()
    }

    /// References on `resource` the open handles account for.
    pub fn expected_dependencies(&self, resource: Resource) -> usize {
        self.families
            .iter()
            .filter(|family| family.resource == resource)
            .map(|family| match family.scope {
                DependencyScope::PerHandle => family.open_handles,
                DependencyScope::AtInit => usize::from(family.initialized),
            })
            .sum()
    }
}
