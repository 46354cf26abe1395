//! Model-based property tests.
//!
//! These tests generate random operation sequences and verify that a real
//! AES-CTR driver on a simulated partition behaves exactly as the reference
//! model predicts, with the resource invariants holding after every step.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelBridge    BridgeWorld      Compare
//!      (reference)    (SimPartition)   Outcomes
//! ```

use nsbridge_harness::{
    BridgeWorld, InvariantRegistry, ModelBridge, ModelMode, Operation, Outcome, model,
};
use proptest::prelude::*;

fn mode_strategy() -> impl Strategy<Value = ModelMode> {
    prop_oneof![Just(ModelMode::Polling), Just(ModelMode::Blocking), Just(ModelMode::Callback),]
}

/// Strategy for generating operations on the model's slots.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    let slot = 0..model::SLOTS as u8;

    prop_oneof![
        // Weight towards operations that move resources
        3 => (slot.clone(), mode_strategy())
            .prop_map(|(slot, mode)| Operation::Open { slot, mode }),
        6 => (slot.clone(), any::<u8>()).prop_map(|(slot, len)| Operation::Encrypt { slot, len }),
        2 => slot.clone().prop_map(|slot| Operation::Close { slot }),
        1 => slot.prop_map(|slot| Operation::Cancel { slot }),
        1 => any::<bool>().prop_map(|reject| Operation::RejectOperations { reject }),
        1 => any::<bool>().prop_map(|down| Operation::Transport { down }),
    ]
}

proptest! {
    /// Verify that every outcome matches between model and real driver.
    ///
    /// This is the core model-based test. `model::run` also checks the
    /// standard invariants after each step and compares callback counts at
    /// the end.
    #[test]
    fn prop_model_matches_real(ops in prop::collection::vec(operation_strategy(), 0..80)) {
        if let Err(divergence) = model::run(&ops) {
            prop_assert!(false, "{}", divergence);
        }
    }

    /// Verify that closing every handle returns the bridge to idle.
    #[test]
    fn prop_close_all_returns_to_idle(
        ops in prop::collection::vec(operation_strategy(), 0..60)
    ) {
        let mut world = BridgeWorld::new();
        for op in &ops {
            world.apply(op);
        }

        world.apply(&Operation::Transport { down: false });
        for slot in 0..model::SLOTS as u8 {
            world.apply(&Operation::Close { slot });
        }

        prop_assert_eq!(world.driver().inner().open_handles(), 0);
        prop_assert_eq!(world.driver().inner().operations_in_flight(), 0);
        prop_assert!(!world.driver().inner().access_lock().is_held());
        prop_assert!(InvariantRegistry::standard().check_all(&world.snapshot()).is_ok());
    }

    /// Verify that the model never reports an outcome for a slot it has no
    /// handle on.
    #[test]
    fn prop_model_skips_unopened_slots(
        slot in 0..model::SLOTS as u8,
        len in any::<u8>(),
    ) {
        let mut bridge = ModelBridge::new();
        prop_assert_eq!(bridge.apply(&Operation::Encrypt { slot, len }), Outcome::Skipped);
        prop_assert_eq!(bridge.apply(&Operation::Close { slot }), Outcome::Skipped);
        prop_assert_eq!(bridge.apply(&Operation::Cancel { slot }), Outcome::Skipped);
    }
}

#[test]
fn callback_handles_survive_transport_outage() {
    let ops = [
        Operation::Open { slot: 0, mode: ModelMode::Callback },
        Operation::Encrypt { slot: 0, len: 16 },
        Operation::Transport { down: true },
        Operation::Encrypt { slot: 0, len: 16 },
        Operation::Cancel { slot: 0 },
        Operation::Transport { down: false },
        Operation::Encrypt { slot: 0, len: 16 },
        Operation::Close { slot: 0 },
    ];
    model::run(&ops).unwrap();
}

#[test]
fn every_mode_on_every_slot() {
    let modes = [ModelMode::Polling, ModelMode::Blocking, ModelMode::Callback, ModelMode::Polling];
    let mut ops = Vec::new();
    for (slot, mode) in (0u8..).zip(modes) {
        ops.push(Operation::Open { slot, mode });
        ops.push(Operation::Encrypt { slot, len: 255 });
        ops.push(Operation::Encrypt { slot, len: 0 });
    }
    for slot in 0..model::SLOTS as u8 {
        ops.push(Operation::Close { slot });
    }
    model::run(&ops).unwrap();
}
