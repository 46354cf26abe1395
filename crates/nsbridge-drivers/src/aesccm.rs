//! AES in counter-with-CBC-MAC mode.
//!
//! Authenticated encryption over the shared AES accelerator. One-step calls
//! take the whole message, its associated data and the nonce at once. The
//! segmented form is started with `setup_*` and configured with
//! `set_lengths` and `set_nonce`; those three are control messages answered
//! inside the call. Associated data then goes through `add_aad`, payload
//! through `add_data`, and `finalize_encrypt`/`finalize_decrypt` produce or
//! check the tag. Every step that touches the hardware takes the access lock.
//!
//! Decryption that fails tag verification reports [`STATUS_MAC_INVALID`] and
//! leaves no plaintext behind.

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, HwConfig, OperationKind, Params,
    PendingOperation, PowerManager, RefCountPower, Resource, SecureChannel,
};
use nsbridge_proto::{FamilyId, MessageType, Status};

use crate::{OperationPart, call_part, dispatch_part, dispatch_part_async, key::CryptoKey};

/// Nonce lengths CCM accepts, in bytes.
pub const NONCE_LENGTHS: std::ops::RangeInclusive<usize> = 7..=13;

/// Tag lengths CCM accepts, in bytes.
pub const MAC_LENGTHS: &[usize] = &[4, 6, 8, 10, 12, 14, 16];

/// Tag did not verify during decryption.
pub const STATUS_MAC_INVALID: Status = Status::family_specific(1);

/// Requested feature is not available on this device.
pub const STATUS_FEATURE_NOT_SUPPORTED: Status = Status::family_specific(2);

/// AES-CCM message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AesCcmMsg {
    /// Open by index
    Open = 0,
    /// Construct from configuration
    Construct = 1,
    /// Close
    Close = 2,
    /// Register completion relay
    RegisterCallback = 3,
    /// One-step encryption and tag generation
    OneStepEncrypt = 4,
    /// One-step decryption and tag verification
    OneStepDecrypt = 5,
    /// Segmented encryption setup
    SetupEncrypt = 6,
    /// Segmented decryption setup
    SetupDecrypt = 7,
    /// Total associated-data, payload and tag lengths
    SetLengths = 8,
    /// Nonce for the segmented operation
    SetNonce = 9,
    /// Associated-data segment
    AddAad = 10,
    /// Payload segment
    AddData = 11,
    /// Final payload segment, producing the tag
    FinalizeEncrypt = 12,
    /// Final payload segment, verifying the tag
    FinalizeDecrypt = 13,
    /// Cancel in-flight operation
    CancelOperation = 14,
}

impl MessageType for AesCcmMsg {
    const FAMILY: &'static str = "AESCCM";
    const OPEN: Self = Self::Open;
    const CONSTRUCT: Self = Self::Construct;
    const CLOSE: Self = Self::Close;
    const REGISTER_CALLBACK: Self = Self::RegisterCallback;
    const CANCEL_OPERATION: Self = Self::CancelOperation;

    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Open,
            1 => Self::Construct,
            2 => Self::Close,
            3 => Self::RegisterCallback,
            4 => Self::OneStepEncrypt,
            5 => Self::OneStepDecrypt,
            6 => Self::SetupEncrypt,
            7 => Self::SetupDecrypt,
            8 => Self::SetLengths,
            9 => Self::SetNonce,
            10 => Self::AddAad,
            11 => Self::AddData,
            12 => Self::FinalizeEncrypt,
            13 => Self::FinalizeDecrypt,
            14 => Self::CancelOperation,
            _ => return None,
        })
    }
}

/// Whole-message operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmOneStep {
    /// Key
    pub key: CryptoKey,
    /// Nonce, 7 to 13 bytes
    pub nonce: Vec<u8>,
    /// Associated data, authenticated but not encrypted
    pub aad: Vec<u8>,
    /// Plaintext or ciphertext
    pub input: Vec<u8>,
    /// Result, written by the secure side
    pub output: Vec<u8>,
    /// Tag: written on encryption, checked on decryption
    pub mac: Vec<u8>,
    /// Tag length for encryption
    pub mac_len: usize,
}

/// Segmented operation setup.
///
/// Zero lengths may be supplied later through `set_lengths`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmSetup {
    /// Key
    pub key: CryptoKey,
    /// Total associated-data length
    pub aad_len: usize,
    /// Total payload length
    pub payload_len: usize,
    /// Tag length
    pub mac_len: usize,
}

/// Lengths of a segmented operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AesCcmLengths {
    /// Total associated-data length
    pub aad_len: usize,
    /// Total payload length
    pub payload_len: usize,
    /// Tag length
    pub mac_len: usize,
}

/// Nonce of a segmented operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmNonce {
    /// Nonce, 7 to 13 bytes
    pub nonce: Vec<u8>,
}

/// Associated-data segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmAad {
    /// Associated data
    pub aad: Vec<u8>,
}

/// Payload segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmSegment {
    /// Segment input
    pub input: Vec<u8>,
    /// Segment output, written by the secure side
    pub output: Vec<u8>,
}

/// Final payload segment and tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCcmFinalize {
    /// Last payload bytes, possibly empty
    pub input: Vec<u8>,
    /// Output for `input`, written by the secure side
    pub output: Vec<u8>,
    /// Tag: written on encryption, checked on decryption
    pub mac: Vec<u8>,
}

/// AES-CCM operation handed to the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AesCcmOperation {
    /// See [`AesCcmOneStep`]
    OneStep(AesCcmOneStep),
    /// See [`AesCcmSetup`]
    Setup(AesCcmSetup),
    /// See [`AesCcmLengths`]
    Lengths(AesCcmLengths),
    /// See [`AesCcmNonce`]
    Nonce(AesCcmNonce),
    /// See [`AesCcmAad`]
    Aad(AesCcmAad),
    /// See [`AesCcmSegment`]
    Segment(AesCcmSegment),
    /// See [`AesCcmFinalize`]
    Finalize(AesCcmFinalize),
}

macro_rules! operation_part {
    ($part:ty, $variant:ident) => {
        impl OperationPart<AesCcmOperation> for $part {
            fn wrap(self) -> AesCcmOperation {
                AesCcmOperation::$variant(self)
            }

            fn unwrap_from(operation: AesCcmOperation) -> Option<Self> {
                match operation {
                    AesCcmOperation::$variant(op) => Some(op),
                    _ => None,
                }
            }
        }
    };
}

operation_part!(AesCcmOneStep, OneStep);
operation_part!(AesCcmSetup, Setup);
operation_part!(AesCcmLengths, Lengths);
operation_part!(AesCcmNonce, Nonce);
operation_part!(AesCcmAad, Aad);
operation_part!(AesCcmSegment, Segment);
operation_part!(AesCcmFinalize, Finalize);

/// AES-CCM family.
#[derive(Debug, Clone, Copy)]
pub struct AesCcm;

impl Family for AesCcm {
    const NAME: &'static str = "AESCCM";
    const ID: FamilyId = FamilyId::AES_CCM;
    const RESOURCE: Resource = Resource::Crypto;

    type MsgType = AesCcmMsg;
    type Operation = AesCcmOperation;
    type Params = ();
}

/// AES-CCM driver.
#[derive(Debug, Clone)]
pub struct AesCcmDriver<C, P = RefCountPower> {
    driver: Driver<AesCcm, C, P>,
}

impl<C: SecureChannel<AesCcm>, P: PowerManager> AesCcmDriver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<AesCcm, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<AesCcm, C, P> {
        &self.driver
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<AesCcm>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<AesCcm>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle)
    }

    /// Encrypt a whole message and generate its tag.
    pub fn one_step_encrypt(
        &self,
        handle: &Handle,
        operation: &mut AesCcmOneStep,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesCcmMsg::OneStepEncrypt, kind, operation)
    }

    /// Decrypt a whole message and verify its tag.
    pub fn one_step_decrypt(
        &self,
        handle: &Handle,
        operation: &mut AesCcmOneStep,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesCcmMsg::OneStepDecrypt, kind, operation)
    }

    /// Encrypt a whole message on an async handle.
    pub fn one_step_encrypt_async(
        &self,
        handle: &Handle,
        operation: AesCcmOneStep,
    ) -> Result<PendingOperation<AesCcm>, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part_async(&self.driver, handle, AesCcmMsg::OneStepEncrypt, kind, operation)
    }

    /// Decrypt a whole message on an async handle.
    pub fn one_step_decrypt_async(
        &self,
        handle: &Handle,
        operation: AesCcmOneStep,
    ) -> Result<PendingOperation<AesCcm>, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part_async(&self.driver, handle, AesCcmMsg::OneStepDecrypt, kind, operation)
    }

    /// Start a segmented encryption.
    pub fn setup_encrypt(
        &self,
        handle: &Handle,
        setup: &mut AesCcmSetup,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesCcmMsg::SetupEncrypt, setup)
    }

    /// Start a segmented decryption.
    pub fn setup_decrypt(
        &self,
        handle: &Handle,
        setup: &mut AesCcmSetup,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesCcmMsg::SetupDecrypt, setup)
    }

    /// Set the lengths of a segmented operation whose setup left them zero.
    pub fn set_lengths(
        &self,
        handle: &Handle,
        mut lengths: AesCcmLengths,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesCcmMsg::SetLengths, &mut lengths)
    }

    /// Set the nonce of a segmented operation.
    pub fn set_nonce(&self, handle: &Handle, nonce: &[u8]) -> Result<(), DriverError> {
        let mut nonce = AesCcmNonce { nonce: nonce.to_vec() };
        call_part(&self.driver, handle, AesCcmMsg::SetNonce, &mut nonce)
    }

    /// Have the device generate a nonce.
    ///
    /// # Errors
    ///
    /// Always `DriverError::Failed(STATUS_FEATURE_NOT_SUPPORTED)`; nothing
    /// is sent to the secure side.
    pub fn generate_nonce(&self, handle: &Handle) -> Result<Vec<u8>, DriverError> {
        let handle = handle.id();
        tracing::debug!(family = AesCcm::NAME, %handle, "nonce generation unsupported");
        Err(DriverError::Failed(STATUS_FEATURE_NOT_SUPPORTED))
    }

    /// Authenticate one associated-data segment.
    pub fn add_aad(
        &self,
        handle: &Handle,
        segment: &mut AesCcmAad,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesCcmMsg::AddAad, OperationKind::AddData, segment)
    }

    /// Process one payload segment.
    pub fn add_data(
        &self,
        handle: &Handle,
        segment: &mut AesCcmSegment,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesCcmMsg::AddData, OperationKind::AddData, segment)
    }

    /// Process the last payload bytes and write the tag.
    pub fn finalize_encrypt(
        &self,
        handle: &Handle,
        last: &mut AesCcmFinalize,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::Finalize;
        dispatch_part(&self.driver, handle, AesCcmMsg::FinalizeEncrypt, kind, last)
    }

    /// Process the last payload bytes and verify the tag.
    pub fn finalize_decrypt(
        &self,
        handle: &Handle,
        last: &mut AesCcmFinalize,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::Finalize;
        dispatch_part(&self.driver, handle, AesCcmMsg::FinalizeDecrypt, kind, last)
    }

    /// Cancel the in-flight operation.
    pub fn cancel_operation(&self, handle: &Handle) -> Result<(), DriverError> {
        self.driver.cancel_operation(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_codes_are_stable() {
        assert_eq!(AesCcmMsg::RegisterCallback.code(), 3);
        assert_eq!(AesCcmMsg::AddAad.code(), 10);
        for code in 0..=14 {
            assert_eq!(AesCcmMsg::from_code(code).map(AesCcmMsg::code), Some(code));
        }
        assert_eq!(AesCcmMsg::from_code(15), None);
    }

    #[test]
    fn parts_unwrap_only_their_shape() {
        let aad = AesCcmAad { aad: b"header".to_vec() };

        let wrapped = aad.clone().wrap();

        assert_eq!(AesCcmAad::unwrap_from(wrapped.clone()), Some(aad));
        assert_eq!(AesCcmSegment::unwrap_from(wrapped), None);
    }
}
