//! TRNG driver against the simulated partition.
//!
//! The TRNG sits outside the shared accelerator: requests queue on the
//! secure side instead of taking the access lock, and the power dependency
//! is held from init rather than per handle.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use nsbridge_core::{
    AccessLock, ChannelError, Completion, Constraint, Driver, DriverConfig, DriverError, Message,
    Notification, Params, RefCountPower, Resource, SecureCallback, SecureChannel,
};
use nsbridge_drivers::{
    CryptoKey, Trng, TrngDriver,
    trng::{MAX_REQUEST_LEN, RandomBytes, STATUS_ENTROPY_FAILURE, TrngKey, TrngMsg, TrngOperation},
};
use nsbridge_harness::{PartitionConfig, SimPartition, Timing, TrngEngine};
use nsbridge_proto::{InVec, OutVec, Status};

type TrngPartition = SimPartition<Trng, TrngEngine>;

fn setup(timing: Timing) -> (TrngPartition, TrngDriver<TrngPartition>) {
    let partition = TrngPartition::with_config(
        TrngEngine::with_seed(42),
        PartitionConfig { timing, ..PartitionConfig::default() },
    );
    let driver = TrngDriver::new(Driver::new(
        partition.clone(),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig::default(),
    ));
    driver.init();
    (partition, driver)
}

#[test]
fn random_bytes_have_requested_length() {
    let (_, driver) = setup(Timing::Immediate);
    let handle = driver.open(0, None).unwrap();

    let mut first = RandomBytes::new(32);
    let mut second = RandomBytes::new(32);
    assert_eq!(driver.get_random_bytes(&handle, &mut first), Ok(Completion::Done));
    assert_eq!(driver.get_random_bytes(&handle, &mut second), Ok(Completion::Done));

    assert_eq!(first.bytes.len(), 32);
    assert_ne!(first.bytes, second.bytes);
}

#[test]
fn oversized_request_never_reaches_the_secure_side() {
    let (partition, driver) = setup(Timing::Immediate);
    let handle = driver.open(0, Some(Params::polling())).unwrap();

    let mut request = RandomBytes::new(MAX_REQUEST_LEN + 1);
    let result = driver.get_random_bytes(&handle, &mut request);

    assert_eq!(result, Err(DriverError::Failed(Status::INVALID_INPUTS)));
    assert_eq!(partition.call_count(TrngMsg::GetRandomBytes), 0);

    let mut largest = RandomBytes::new(MAX_REQUEST_LEN);
    assert_eq!(driver.get_random_bytes(&handle, &mut largest), Ok(Completion::Done));
}

#[test]
fn transport_failure_reads_as_driver_error() {
    let (partition, driver) = setup(Timing::Immediate);
    let handle = driver.open(0, None).unwrap();
    partition.transport_down(true);

    let result = driver.get_random_bytes(&handle, &mut RandomBytes::new(8));

    assert_eq!(result, Err(DriverError::Failed(Status::ERROR)));
    assert_eq!(driver.inner().power().stats().constraint_sets, 1);
    assert_eq!(driver.inner().power().stats().constraint_releases, 1);
}

#[test]
fn failed_health_test_is_reported() {
    let (partition, driver) = setup(Timing::Immediate);
    let handle = driver.open(0, Some(Params::polling())).unwrap();
    partition.executor().fail_health_test(true);

    let result = driver.get_random_bytes(&handle, &mut RandomBytes::new(16));

    assert_eq!(result, Err(DriverError::Failed(STATUS_ENTROPY_FAILURE)));
}

#[test]
fn generated_key_fills_the_blank_slot() {
    let (_, driver) = setup(Timing::Deferred(Duration::from_millis(1)));
    let handle = driver.open(0, Some(Params::blocking())).unwrap();

    let mut request = TrngKey { key: CryptoKey::Blank { len: 24 } };
    assert_eq!(driver.generate_key(&handle, &mut request), Ok(Completion::Done));

    assert!(matches!(&request.key, CryptoKey::Plaintext(bytes) if bytes.len() == 24));
}

#[test]
fn requests_queue_instead_of_locking() {
    let (_, driver) = setup(Timing::Immediate);
    let a = driver.open(0, None).unwrap();
    let b = driver.open(1, Some(Params::polling())).unwrap();

    driver.get_random_bytes(&a, &mut RandomBytes::new(4)).unwrap();
    driver.get_random_bytes(&b, &mut RandomBytes::new(4)).unwrap();

    assert_eq!(driver.inner().access_lock().stats().acquisitions, 0);
}

#[test]
fn dependency_is_held_from_init_not_per_handle() {
    let (_, driver) = setup(Timing::Immediate);
    let power = driver.inner().power().clone();
    assert_eq!(power.dependency_count(Resource::Trng), 1);

    let a = driver.open(0, None).unwrap();
    let b = driver.open(1, None).unwrap();
    assert_eq!(power.dependency_count(Resource::Trng), 1);

    driver.close(a).unwrap();
    driver.close(b).unwrap();
    driver.init();
    assert_eq!(power.dependency_count(Resource::Trng), 1);
}

/// Accepts every random-bytes request without completing it, keeping the
/// registered relay so the test decides when completions arrive.
struct AcceptOnly {
    partition: TrngPartition,
    relay: Mutex<Option<Arc<dyn SecureCallback<Trng>>>>,
}

impl SecureChannel<Trng> for AcceptOnly {
    fn call(
        &self,
        msg_type: TrngMsg,
        invec: InVec<'_, Message<'_, Trng>>,
        mut outvec: OutVec<'_>,
    ) -> Result<(), ChannelError> {
        if let Message::RegisterCallback(msg) = invec.base() {
            *self.relay.lock().unwrap() = Some(Arc::clone(&msg.callback));
        }
        if msg_type == TrngMsg::GetRandomBytes {
            assert!(outvec.write(Status::SUCCESS.to_word()));
            return Ok(());
        }
        self.partition.call(msg_type, invec, outvec)
    }
}

#[test]
fn back_to_back_requests_on_one_handle_each_complete() {
    let channel = Arc::new(AcceptOnly {
        partition: TrngPartition::new(TrngEngine::with_seed(7)),
        relay: Mutex::new(None),
    });
    let driver = TrngDriver::new(Driver::new(
        Arc::clone(&channel),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig::default(),
    ));
    driver.init();

    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callbacks);
    let params = Params::callback(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let handle = driver.open(0, Some(params)).unwrap();

    let pending = driver.get_random_bytes(&handle, &mut RandomBytes::new(16));
    assert_eq!(pending, Ok(Completion::Pending));
    let pending = driver.get_random_bytes(&handle, &mut RandomBytes::new(16));
    assert_eq!(pending, Ok(Completion::Pending));
    assert_eq!(driver.inner().operations_in_flight(), 2);

    let relay = channel.relay.lock().unwrap().clone().unwrap();
    for _ in 0..2 {
        relay.post(Notification {
            handle: handle.id(),
            status: Status::SUCCESS,
            kind: TrngMsg::GetRandomBytes,
            operation: None,
        });
    }

    let power = driver.inner().power();
    assert_eq!(callbacks.load(Ordering::Relaxed), 2);
    assert_eq!(power.constraint_count(Constraint::DisallowStandby), 0);
    assert_eq!(power.stats().constraint_sets, 2);
    assert_eq!(power.stats().constraint_releases, 2);
    assert!(!driver.inner().is_in_flight(&handle));
}

#[test]
fn queued_requests_complete_in_order_and_balance_constraints() {
    let (partition, driver) = setup(Timing::Manual);
    let lens = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lens);
    let params = Params::callback(move |n: Notification<Trng>| {
        assert_eq!(n.status, Status::SUCCESS);
        if let Some(TrngOperation::Bytes(done)) = n.operation {
            sink.lock().unwrap().push(done.bytes.len());
        }
    });
    let handle = driver.open(0, Some(params)).unwrap();

    for len in [8, 16, 24, 32] {
        let completion = driver.get_random_bytes(&handle, &mut RandomBytes::new(len));
        assert_eq!(completion, Ok(Completion::Pending));
    }
    assert_eq!(partition.in_flight(), 4);
    assert_eq!(driver.inner().operations_in_flight(), 4);
    assert_eq!(driver.inner().power().constraint_count(Constraint::DisallowStandby), 4);

    assert_eq!(partition.complete_all(), 4);

    assert_eq!(*lens.lock().unwrap(), [8, 16, 24, 32]);
    assert_eq!(driver.inner().operations_in_flight(), 0);
    assert_eq!(driver.inner().power().constraint_count(Constraint::DisallowStandby), 0);
    assert_eq!(driver.inner().access_lock().stats().acquisitions, 0);
}

#[test]
fn concurrent_blocking_handles_never_touch_the_lock() {
    let (partition, driver) = setup(Timing::Deferred(Duration::from_millis(1)));
    let driver = Arc::new(driver);

    let workers: Vec<_> = (0..4)
        .map(|index| {
            let driver = Arc::clone(&driver);
            std::thread::spawn(move || {
                let handle = driver.open(index, Some(Params::blocking())).unwrap();
                let mut request = RandomBytes::new(12);
                let completion = driver.get_random_bytes(&handle, &mut request);
                (completion, request.bytes.len())
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), (Ok(Completion::Done), 12));
    }
    assert_eq!(partition.completions(), 4);
    assert_eq!(driver.inner().access_lock().stats().acquisitions, 0);
    assert_eq!(driver.inner().power().constraint_count(Constraint::DisallowStandby), 0);
}

#[tokio::test]
async fn async_bytes_resolve_through_the_future() {
    let (_, driver) = setup(Timing::Deferred(Duration::from_millis(2)));
    let handle = driver.open(0, Some(Params::asynchronous())).unwrap();

    let pending = driver.get_random_bytes_async(&handle, RandomBytes::new(48)).unwrap();
    let TrngOperation::Bytes(done) = pending.wait().await.unwrap() else {
        panic!("operation came back in another shape");
    };

    assert_eq!(done.bytes.len(), 48);
}
