//! End-to-end dispatch scenarios against the simulated partition.
//!
//! Each test walks one path through the dispatcher and checks what the
//! secure side saw and what the lock and power manager were left holding:
//! - Polling on a synchronous family never touches the relay
//! - Blocking waits for a deferred completion
//! - A held lock turns a dispatch into a no-op
//! - Callback failures still release exactly once
//! - Closing one handle leaves its siblings alone
//! - Cancellation completes through the normal path

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use nsbridge_core::{
    AccessLock, Completion, Constraint, Driver, DriverConfig, DriverError, HwConfig, Params,
    RefCountPower, Resource, Timeout,
};
use nsbridge_drivers::{
    AesCtr, AesCtrDriver, CryptoKey,
    aesctr::{AesCtrMsg, AesCtrOneStep, AesCtrOperation},
};
use nsbridge_harness::{
    AesCtrEngine, BridgeSnapshot, ExecFn, Executor, FailWith, InvariantRegistry, PartitionConfig,
    SimPartition, Timing, init_test_logging,
};
use nsbridge_proto::Status;

type CtrPartition = SimPartition<AesCtr, AesCtrEngine>;

fn partition(timing: Timing) -> CtrPartition {
    init_test_logging();
    CtrPartition::with_config(
        AesCtrEngine::default(),
        PartitionConfig { timing, ..PartitionConfig::default() },
    )
}

fn driver<X>(partition: &SimPartition<AesCtr, X>) -> AesCtrDriver<SimPartition<AesCtr, X>>
where
    X: Executor<AesCtr>,
{
    let driver = AesCtrDriver::new(Driver::new(
        partition.clone(),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig::default(),
    ));
    driver.init();
    driver
}

fn encryption(plaintext: &[u8]) -> AesCtrOneStep {
    AesCtrOneStep {
        key: CryptoKey::aes(vec![0x42; 16]).unwrap(),
        input: plaintext.to_vec(),
        ..AesCtrOneStep::default()
    }
}

/// Callback spy recording every status it is handed.
fn spy() -> (Arc<Mutex<Vec<Status>>>, Params<AesCtr>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let params = Params::callback(move |notification| {
        sink.lock().unwrap().push(notification.status);
    });
    (seen, params)
}

fn assert_idle<X>(driver: &AesCtrDriver<SimPartition<AesCtr, X>>, context: &str)
where
    X: Executor<AesCtr>,
{
    let snapshot = BridgeSnapshot::of_driver(driver.inner());
    InvariantRegistry::standard().assert_all(&snapshot, context);
    assert!(!driver.inner().access_lock().is_held(), "{context}: lock still held");
    assert_eq!(
        driver.inner().power().constraint_count(Constraint::DisallowStandby),
        0,
        "{context}: standby constraint still held"
    );
}

#[test]
fn polling_encrypt_completes_without_the_relay() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    let handle = driver.open(0, Some(Params::polling())).unwrap();

    let mut op = encryption(b"sixteen byte msg and then some");
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Done));

    assert_eq!(op.output.len(), op.input.len());
    assert_ne!(op.output, op.input);
    assert_eq!(partition.registered_callbacks(), 0);
    assert_eq!(partition.completions(), 0);

    let lock = driver.inner().access_lock().stats();
    assert_eq!((lock.acquisitions, lock.releases), (1, 1));
    assert_eq!(driver.inner().power().stats().constraint_sets, 0);
    assert_idle(&driver, "after polling encrypt");
}

#[test]
fn blocking_encrypt_waits_for_deferred_completion() {
    let delay = Duration::from_millis(10);
    let partition = partition(Timing::Deferred(delay));
    let driver = driver(&partition);
    let handle = driver.open(0, Some(Params::blocking())).unwrap();
    assert_eq!(partition.registered_callbacks(), 1);

    let mut op = encryption(&[7u8; 48]);
    let started = Instant::now();
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Done));

    assert!(started.elapsed() >= delay, "returned before the completion was posted");
    assert_eq!(op.output.len(), 48);
    assert_eq!(partition.completions(), 1);

    let power = driver.inner().power().stats();
    assert_eq!((power.constraint_sets, power.constraint_releases), (1, 1));
    assert_idle(&driver, "after blocking encrypt");
}

#[test]
fn secure_side_writes_reach_the_caller() {
    let stamp = |msg: AesCtrMsg, op: &mut AesCtrOperation| {
        if let AesCtrOperation::OneStep(one_step) = op {
            one_step.output = vec![msg as u8; 3];
        }
        Status::SUCCESS
    };
    let partition = SimPartition::<AesCtr, _>::new(ExecFn(stamp));
    let driver = driver(&partition);
    let expected = vec![AesCtrMsg::OneStepDecrypt as u8; 3];

    // polling writes in place, blocking copies the relay's result back
    for (index, params) in (0u8..).zip([Params::polling(), Params::blocking()]) {
        let handle = driver.open(index, Some(params)).unwrap();
        let mut op = encryption(b"ignored");
        assert_eq!(driver.one_step_decrypt(&handle, &mut op), Ok(Completion::Done));
        assert_eq!(op.output, expected);
    }
    assert_idle(&driver, "after stamped operations");
}

#[test]
fn held_lock_turns_dispatch_into_no_op() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    let handle = driver.open(0, Some(Params::polling())).unwrap();

    let lock = driver.inner().access_lock();
    assert!(lock.acquire(Timeout::NoWait));

    let mut op = encryption(b"never sent");
    let result = driver.one_step_encrypt(&handle, &mut op);

    assert_eq!(result, Err(DriverError::ResourceUnavailable));
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(partition.call_count(AesCtrMsg::OneStepEncrypt), 0);
    assert!(op.output.is_empty());
    assert_eq!(driver.inner().power().stats().constraint_sets, 0);
    assert!(!driver.inner().is_in_flight(&handle));

    lock.release();
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Done));
    assert_eq!(partition.call_count(AesCtrMsg::OneStepEncrypt), 1);
}

#[test]
fn callback_failure_is_delivered_once_and_releases_once() {
    let partition = SimPartition::<AesCtr, _>::new(FailWith(Status::ERROR));
    let driver = driver(&partition);
    let (seen, params) = spy();
    let handle = driver.open(0, Some(params)).unwrap();

    let mut op = encryption(b"doomed");
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Pending));

    assert_eq!(*seen.lock().unwrap(), vec![Status::ERROR]);
    let power = driver.inner().power().stats();
    assert_eq!((power.constraint_sets, power.constraint_releases), (1, 1));
    let lock = driver.inner().access_lock().stats();
    assert_eq!((lock.acquisitions, lock.releases, lock.spurious_releases), (1, 1, 0));
    assert_idle(&driver, "after failed callback operation");
}

#[test]
fn closing_one_handle_leaves_siblings_registered() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);

    let a = driver.open(0, Some(Params::blocking())).unwrap();
    let b = driver.construct(&HwConfig::default(), Some(Params::blocking())).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(partition.registered_callbacks(), 2);
    assert_eq!(driver.inner().power().dependency_count(Resource::Crypto), 2);

    driver.close(a).unwrap();

    assert_eq!(partition.registered_callbacks(), 1);
    assert_eq!(partition.open_handles(), 1);
    assert_eq!(driver.inner().power().dependency_count(Resource::Crypto), 1);

    let mut op = encryption(b"still here");
    assert_eq!(driver.one_step_encrypt(&b, &mut op), Ok(Completion::Done));
    assert_eq!(op.output.len(), op.input.len());

    driver.close(b).unwrap();
    assert_eq!(driver.inner().power().dependency_count(Resource::Crypto), 0);
    assert_idle(&driver, "after closing both handles");
}

#[test]
fn canceled_operation_completes_through_its_callback() {
    let partition = partition(Timing::Manual);
    let driver = driver(&partition);
    let (seen, params) = spy();
    let handle = driver.open(0, Some(params)).unwrap();

    let mut op = encryption(b"cancel me");
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Pending));
    assert!(driver.inner().is_in_flight(&handle));
    assert!(driver.inner().access_lock().is_held());

    driver.cancel_operation(&handle).unwrap();
    // cancellation neither takes nor releases anything by itself
    assert!(driver.inner().access_lock().is_held());
    assert!(seen.lock().unwrap().is_empty());

    assert!(partition.complete_next());
    assert!(!partition.complete_next());

    assert_eq!(*seen.lock().unwrap(), vec![Status::CANCELED]);
    let lock = driver.inner().access_lock().stats();
    assert_eq!(lock.acquisitions, lock.releases);
    assert_eq!(lock.spurious_releases, 0);
    assert_idle(&driver, "after canceled operation");
}

#[test]
fn cancel_without_operation_in_flight_is_harmless() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    let handle = driver.open(0, Some(Params::blocking())).unwrap();

    driver.cancel_operation(&handle).unwrap();

    let mut op = encryption(b"unaffected");
    assert_eq!(driver.one_step_encrypt(&handle, &mut op), Ok(Completion::Done));
    assert_idle(&driver, "after idle cancel");
}

#[test]
fn rejected_operation_fails_synchronously() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    let (seen, params) = spy();
    let handle = driver.open(0, Some(params)).unwrap();
    partition.reject_operations(Some(Status::INVALID_INPUTS));

    let mut op = encryption(b"rejected");
    let result = driver.one_step_encrypt(&handle, &mut op);

    assert_eq!(result, Err(DriverError::Failed(Status::INVALID_INPUTS)));
    assert!(seen.lock().unwrap().is_empty(), "rejected operations never reach the callback");
    assert_idle(&driver, "after rejected operation");
}

#[test]
fn open_before_init_is_refused() {
    let partition = partition(Timing::Immediate);
    let driver = AesCtrDriver::new(Driver::new(
        partition.clone(),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig::default(),
    ));

    let result = driver.open(0, None);

    assert!(matches!(result, Err(DriverError::NotInitialized { family: "AESCTR" })));
    assert!(partition.calls().is_empty());
}

#[test]
fn refused_registration_leaks_the_secure_handle() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    partition.refuse_registration(true);

    let result = driver.open(0, Some(Params::blocking()));

    assert!(matches!(result, Err(DriverError::RegistrationFailed { .. })));
    assert_eq!(driver.inner().open_handles(), 0);
    assert_eq!(partition.open_handles(), 1);
    assert_eq!(driver.inner().power().dependency_count(Resource::Crypto), 0);

    // polling handles on a synchronous family never register
    let polling = driver.open(1, Some(Params::polling()));
    assert!(polling.is_ok());
}

#[test]
fn blocking_lock_wait_times_out() {
    let partition = partition(Timing::Immediate);
    let driver = driver(&partition);
    let params = Params::blocking().with_timeout(Timeout::After(Duration::from_millis(5)));
    let handle = driver.open(0, Some(params)).unwrap();

    let lock = driver.inner().access_lock();
    assert!(lock.acquire(Timeout::NoWait));
    let started = Instant::now();

    let result = driver.one_step_encrypt(&handle, &mut encryption(b"late"));

    assert_eq!(result, Err(DriverError::ResourceUnavailable));
    assert!(started.elapsed() >= Duration::from_millis(5));
    assert_eq!(lock.stats().timeouts, 1);
    lock.release();
}
