//! Power dependency and constraint bookkeeping.
//!
//! Two reference-counted resources are tied to driver activity:
//!
//! - A **dependency** on the accelerator's power domain, held for as long as
//!   a handle is open (or, for some families, from `init` onwards).
//! - A **constraint** forbidding standby, held from dispatch until the
//!   operation completes. Polling operations never take it.
//!
//! # Invariants
//!
//! - Every set is matched by exactly one release over a handle's or an
//!   operation's lifetime.
//! - A release at zero is reported as [`PowerError::Underflow`] and leaves the
//!   count at zero.

use std::sync::{Arc, Mutex};

use crate::error::PowerError;

/// Power domain a driver family depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Symmetric crypto and hash accelerator
    Crypto,
    /// True random number generator
    Trng,
    /// Public-key accelerator
    Pka,
}

impl Resource {
    const COUNT: usize = 3;

    fn slot(self) -> usize {
        self as usize
    }

    /// Name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Crypto => "PERIPH_CRYPTO",
            Self::Trng => "PERIPH_TRNG",
            Self::Pka => "PERIPH_PKA",
        }
    }
}

/// Power constraint held while an operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Device must not enter standby
    DisallowStandby,
}

impl Constraint {
    const COUNT: usize = 1;

    fn slot(self) -> usize {
        self as usize
    }

    /// Name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::DisallowStandby => "DISALLOW_STANDBY",
        }
    }
}

/// Process-wide power manager.
///
/// Implementations are cheap to clone and share state across clones.
pub trait PowerManager: Clone + Send + Sync + 'static {
    /// Take a reference on `resource`.
    fn set_dependency(&self, resource: Resource) -> Result<(), PowerError>;

    /// Drop a reference on `resource`.
    fn release_dependency(&self, resource: Resource) -> Result<(), PowerError>;

    /// Take a reference on `constraint`.
    fn set_constraint(&self, constraint: Constraint) -> Result<(), PowerError>;

    /// Drop a reference on `constraint`.
    fn release_constraint(&self, constraint: Constraint) -> Result<(), PowerError>;
}

/// Cumulative set/release counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerStats {
    /// Dependencies taken
    pub dependency_sets: usize,
    /// Dependencies dropped
    pub dependency_releases: usize,
    /// Constraints taken
    pub constraint_sets: usize,
    /// Constraints dropped
    pub constraint_releases: usize,
    /// Releases refused because the count was already zero
    pub underflows: usize,
}

#[derive(Debug, Default)]
struct Counts {
    dependencies: [usize; Resource::COUNT],
    constraints: [usize; Constraint::COUNT],
    stats: PowerStats,
}

/// In-process reference-counting power manager.
///
/// Uses `Arc<Mutex<>>` so every clone observes the same counts.
#[derive(Debug, Clone, Default)]
pub struct RefCountPower {
    inner: Arc<Mutex<Counts>>,
}

impl RefCountPower {
    /// Create a manager with all counts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reference count on `resource`.
    pub fn dependency_count(&self, resource: Resource) -> usize {
        self.with_counts(|counts| counts.dependencies[resource.slot()])
    }

    /// Current reference count on `constraint`.
    pub fn constraint_count(&self, constraint: Constraint) -> usize {
        self.with_counts(|counts| counts.constraints[constraint.slot()])
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> PowerStats {
        self.with_counts(|counts| counts.stats)
    }

    fn with_counts<R>(&self, f: impl FnOnce(&mut Counts) -> R) -> R {
        #[allow(clippy::expect_used)]
        let mut counts = self.inner.lock().expect("power counts mutex poisoned");
        f(&mut counts)
    }
}

impl PowerManager for RefCountPower {
    fn set_dependency(&self, resource: Resource) -> Result<(), PowerError> {
        self.with_counts(|counts| {
            counts.dependencies[resource.slot()] += 1;
            counts.stats.dependency_sets += 1;
        });
        tracing::trace!(resource = resource.name(), "power dependency set");
        Ok(())
    }

    fn release_dependency(&self, resource: Resource) -> Result<(), PowerError> {
        self.with_counts(|counts| {
            let count = &mut counts.dependencies[resource.slot()];
            if *count == 0 {
                counts.stats.underflows += 1;
                tracing::warn!(resource = resource.name(), "power dependency underflow");
                return Err(PowerError::Underflow { name: resource.name() });
            }
            *count -= 1;
            counts.stats.dependency_releases += 1;
            Ok(())
        })
    }

    fn set_constraint(&self, constraint: Constraint) -> Result<(), PowerError> {
        self.with_counts(|counts| {
            counts.constraints[constraint.slot()] += 1;
            counts.stats.constraint_sets += 1;
        });
        tracing::trace!(constraint = constraint.name(), "power constraint set");
        Ok(())
    }

    fn release_constraint(&self, constraint: Constraint) -> Result<(), PowerError> {
        self.with_counts(|counts| {
            let count = &mut counts.constraints[constraint.slot()];
            if *count == 0 {
                counts.stats.underflows += 1;
                tracing::warn!(constraint = constraint.name(), "power constraint underflow");
                return Err(PowerError::Underflow { name: constraint.name() });
            }
            *count -= 1;
            counts.stats.constraint_releases += 1;
            Ok(())
        })
    }
}
