//! AES-ECB driver against the simulated partition.

use nsbridge_core::{
    AccessLock, ChannelError, Completion, Driver, DriverConfig, DriverError, HwConfig, Message,
    Params, RefCountPower, Resource, SecureChannel,
};
use nsbridge_drivers::{
    AesEcb, AesEcbDriver, CryptoKey,
    aesecb::{AesEcbMsg, AesEcbOperation, BLOCK_LEN},
};
use nsbridge_harness::{AesEcbEngine, SimPartition};
use nsbridge_proto::{InVec, OutVec, Status};

type EcbPartition = SimPartition<AesEcb, AesEcbEngine>;

fn setup() -> (EcbPartition, AesEcbDriver<EcbPartition>) {
    let partition = EcbPartition::new(AesEcbEngine::default());
    let driver = AesEcbDriver::new(Driver::new(
        partition.clone(),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig::default(),
    ));
    driver.init();
    (partition, driver)
}

fn operation(input: Vec<u8>) -> AesEcbOperation {
    AesEcbOperation { key: CryptoKey::aes(vec![0x5c; 32]).unwrap(), input, output: Vec::new() }
}

#[test]
fn round_trip_on_every_return_behavior() {
    let (_, driver) = setup();
    let plaintext: Vec<u8> = (0..3 * BLOCK_LEN as u8).collect();

    for (index, params) in [Params::polling(), Params::blocking()].into_iter().enumerate() {
        let handle = driver.open(index as u8, Some(params)).unwrap();

        let mut encrypt = operation(plaintext.clone());
        assert_eq!(driver.one_step_encrypt(&handle, &mut encrypt), Ok(Completion::Done));
        assert_ne!(encrypt.output, plaintext);

        let mut decrypt = operation(encrypt.output);
        assert_eq!(driver.one_step_decrypt(&handle, &mut decrypt), Ok(Completion::Done));
        assert_eq!(decrypt.output, plaintext);

        driver.close(handle).unwrap();
    }
}

#[test]
fn partial_block_is_invalid_input() {
    let (_, driver) = setup();
    let handle = driver.open(0, Some(Params::polling())).unwrap();

    let mut op = operation(vec![0; BLOCK_LEN + 1]);
    let result = driver.one_step_encrypt(&handle, &mut op);

    assert_eq!(result, Err(DriverError::Failed(Status::INVALID_INPUTS)));
    assert_eq!(result.unwrap_err().status(), Status::INVALID_INPUTS);
    assert!(!driver.inner().access_lock().is_held());
}

#[test]
fn segmented_encryption_matches_one_step() {
    let (partition, driver) = setup();
    let handle = driver.construct(&HwConfig { interrupt_priority: 3 }, None).unwrap();
    let plaintext = vec![0xa7; 4 * BLOCK_LEN];

    let mut whole = operation(plaintext.clone());
    assert_eq!(driver.one_step_encrypt(&handle, &mut whole), Ok(Completion::Done));

    let mut setup = operation(Vec::new());
    driver.setup_encrypt(&handle, &mut setup).unwrap();
    let mut first = operation(plaintext[..BLOCK_LEN].to_vec());
    assert_eq!(driver.add_data(&handle, &mut first), Ok(Completion::Done));
    let mut rest = operation(plaintext[BLOCK_LEN..].to_vec());
    assert_eq!(driver.finalize(&handle, &mut rest), Ok(Completion::Done));

    let mut segmented = first.output;
    segmented.extend(rest.output);
    assert_eq!(segmented, whole.output);
    assert_eq!(partition.call_count(AesEcbMsg::SetupEncrypt), 1);
}

#[test]
fn each_handle_holds_a_crypto_dependency() {
    let (_, driver) = setup();
    let power = driver.inner().power().clone();

    let a = driver.open(0, None).unwrap();
    let b = driver.open(1, None).unwrap();
    assert_eq!(power.dependency_count(Resource::Crypto), 2);

    driver.close(a).unwrap();
    driver.close(b).unwrap();
    assert_eq!(power.dependency_count(Resource::Crypto), 0);
}

#[test]
fn table_full_closes_the_secure_handle() {
    let partition = EcbPartition::new(AesEcbEngine::default());
    let driver = AesEcbDriver::new(Driver::new(
        partition.clone(),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig { max_handles: 1 },
    ));
    driver.init();

    let _first = driver.open(0, None).unwrap();
    let second = driver.open(1, None);

    assert!(second.is_err());
    assert_eq!(partition.open_handles(), 1, "refused handle left open on the secure side");
    assert_eq!(driver.inner().open_handles(), 1);
}

/// Partition whose close messages never arrive.
struct CloseUnreachable(EcbPartition);

impl SecureChannel<AesEcb> for CloseUnreachable {
    fn call(
        &self,
        msg_type: AesEcbMsg,
        invec: InVec<'_, Message<'_, AesEcb>>,
        outvec: OutVec<'_>,
    ) -> Result<(), ChannelError> {
        if msg_type == AesEcbMsg::Close {
            return Err(ChannelError::Unavailable);
        }
        self.0.call(msg_type, invec, outvec)
    }
}

#[test]
fn table_full_with_close_undelivered_still_refuses_the_open() {
    let partition = EcbPartition::new(AesEcbEngine::default());
    let driver = AesEcbDriver::new(Driver::new(
        CloseUnreachable(partition.clone()),
        RefCountPower::new(),
        AccessLock::new(),
        DriverConfig { max_handles: 1 },
    ));
    driver.init();

    let first = driver.open(0, Some(Params::polling())).unwrap();
    let second = driver.open(1, None);

    assert!(matches!(second, Err(DriverError::InvalidHandle(_))));
    assert_eq!(partition.open_handles(), 2, "refused handle stays open on the secure side");
    assert_eq!(driver.inner().open_handles(), 1);

    let mut op = operation(vec![0; BLOCK_LEN]);
    assert_eq!(driver.one_step_encrypt(&first, &mut op), Ok(Completion::Done));
}
