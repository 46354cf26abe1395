//! Fault-injecting channel.
//!
//! Wraps another [`SecureChannel`] and fails a seeded fraction of calls at
//! the transport, so every dispatch path has to release what it took. A
//! failed call never reaches the wrapped channel.

use std::sync::{Arc, Mutex};

use nsbridge_core::{ChannelError, Family, Message, SecureChannel};
use nsbridge_proto::{InVec, OutVec, PsaStatus};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Channel that fails calls with probability `failure_rate`.
///
/// Injected failures are split evenly between a busy partition and an
/// unreachable one. Clones share the RNG and counters.
#[derive(Clone)]
pub struct ChaoticChannel<C> {
    inner: C,
    failure_rate: f64,
    rng: Arc<Mutex<ChaCha8Rng>>,
    /// (attempted, injected)
    counts: Arc<Mutex<(usize, usize)>>,
}

impl<C> ChaoticChannel<C> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// If `failure_rate` is outside `0.0..=1.0`.
    pub fn new(inner: C, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Wrap `inner`; the same seed injects the same failures.
    ///
    /// # Panics
    ///
    /// If `failure_rate` is outside `0.0..=1.0`.
    pub fn with_seed(inner: C, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            counts: Arc::new(Mutex::new((0, 0))),
        }
    }

    /// Wrapped channel.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Total number of calls attempted.
    pub fn call_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.counts.lock().expect("counts mutex poisoned").0
    }

    /// Number of calls failed by injection.
    pub fn injected_failures(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.counts.lock().expect("counts mutex poisoned").1
    }

    fn roll(&self) -> Option<ChannelError> {
        #[allow(clippy::expect_used)]
        let roll: f64 = self.rng.lock().expect("chaos rng mutex poisoned").r#gen();
        let failure = if roll >= self.failure_rate {
            None
        } else if roll < self.failure_rate / 2.0 {
            Some(ChannelError::Rejected(PsaStatus::CONNECTION_BUSY))
        } else {
            Some(ChannelError::Unavailable)
        };

        #[allow(clippy::expect_used)]
        let mut counts = self.counts.lock().expect("counts mutex poisoned");
        counts.0 += 1;
        if failure.is_some() {
            counts.1 += 1;
        }
        failure
    }
}

impl<F: Family, C: SecureChannel<F>> SecureChannel<F> for ChaoticChannel<C> {
    fn init(&self) {
        self.inner.init();
    }

    fn call(
        &self,
        msg_type: F::MsgType,
        invec: InVec<'_, Message<'_, F>>,
        outvec: OutVec<'_>,
    ) -> Result<(), ChannelError> {
        if let Some(error) = self.roll() {
            let message = invec.base().name();
            tracing::debug!(family = F::NAME, message, %error, "injected failure");
            return Err(error);
        }
        self.inner.call(msg_type, invec, outvec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{executor::Succeed, partition::SimPartition};

    type Sim = SimPartition<nsbridge_drivers::AesCtr, Succeed>;

    #[test]
    fn zero_rate_never_fails() {
        let chaos = ChaoticChannel::new(Sim::new(Succeed), 0.0);
        for _ in 0..100 {
            assert!(chaos.roll().is_none());
        }
        assert_eq!(chaos.call_count(), 100);
        assert_eq!(chaos.injected_failures(), 0);
    }

    #[test]
    fn full_rate_always_fails() {
        let chaos = ChaoticChannel::new(Sim::new(Succeed), 1.0);
        for _ in 0..100 {
            assert!(chaos.roll().is_some());
        }
        assert_eq!(chaos.injected_failures(), 100);
    }

    #[test]
    fn same_seed_same_failures() {
        let a = ChaoticChannel::with_seed(Sim::new(Succeed), 0.5, 42);
        let b = ChaoticChannel::with_seed(Sim::new(Succeed), 0.5, 42);
        let rolls_a: Vec<_> = (0..50).map(|_| a.roll()).collect();
        let rolls_b: Vec<_> = (0..50).map(|_| b.roll()).collect();
        assert_eq!(rolls_a, rolls_b);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between")]
    fn rejects_out_of_range_rate() {
        let _ = ChaoticChannel::new(Sim::new(Succeed), 1.5);
    }
}
