//! AES in counter mode.
//!
//! One-step encrypt/decrypt runs a whole message; the segmented form is
//! `setup_*` (sent directly, no hardware involvement), any number of
//! `add_data`, then `finalize`.

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, HwConfig, OperationKind, Params,
    PendingOperation, PowerManager, RefCountPower, Resource, SecureChannel,
};
use nsbridge_proto::{FamilyId, MessageType, Status};

use crate::{OperationPart, call_part, dispatch_part, dispatch_part_async, key::CryptoKey};

/// Size of the counter block in bytes.
pub const COUNTER_LEN: usize = 16;

/// Key length not supported by the accelerator.
pub const STATUS_UNSUPPORTED_KEY: Status = Status::family_specific(1);

/// AES-CTR message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AesCtrMsg {
    /// Open by index
    Open = 0,
    /// Construct from configuration
    Construct = 1,
    /// Close
    Close = 2,
    /// One-step encryption
    OneStepEncrypt = 3,
    /// One-step decryption
    OneStepDecrypt = 4,
    /// Segmented encryption setup
    SetupEncrypt = 5,
    /// Segmented decryption setup
    SetupDecrypt = 6,
    /// Segment
    AddData = 7,
    /// Final segment
    Finalize = 8,
    /// Cancel in-flight operation
    CancelOperation = 9,
    /// Register completion relay
    RegisterCallback = 10,
}

impl MessageType for AesCtrMsg {
    const FAMILY: &'static str = "AESCTR";
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
            3 => Self::OneStepEncrypt,
            4 => Self::OneStepDecrypt,
            5 => Self::SetupEncrypt,
            6 => Self::SetupDecrypt,
            7 => Self::AddData,
            8 => Self::Finalize,
            9 => Self::CancelOperation,
            10 => Self::RegisterCallback,
            _ => return None,
        })
    }
}

/// Whole-message operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCtrOneStep {
    /// Key
    pub key: CryptoKey,
    /// Plaintext or ciphertext
    pub input: Vec<u8>,
    /// Result, written by the secure side
    pub output: Vec<u8>,
    /// Initial counter block
    pub initial_counter: [u8; COUNTER_LEN],
}

/// Segmented operation setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCtrSetup {
    /// Key
    pub key: CryptoKey,
    /// Initial counter block
    pub initial_counter: [u8; COUNTER_LEN],
}

/// One segment of a segmented operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesCtrSegment {
    /// Segment input
    pub input: Vec<u8>,
    /// Segment output, written by the secure side
    pub output: Vec<u8>,
}

/// AES-CTR operation handed to the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AesCtrOperation {
    /// See [`AesCtrOneStep`]
    OneStep(AesCtrOneStep),
    /// See [`AesCtrSetup`]
    Setup(AesCtrSetup),
    /// See [`AesCtrSegment`]
    Segment(AesCtrSegment),
}

impl OperationPart<AesCtrOperation> for AesCtrOneStep {
    fn wrap(self) -> AesCtrOperation {
        AesCtrOperation::OneStep(self)
    }

    fn unwrap_from(operation: AesCtrOperation) -> Option<Self> {
        match operation {
            AesCtrOperation::OneStep(op) => Some(op),
            _ => None,
        }
    }
}

impl OperationPart<AesCtrOperation> for AesCtrSetup {
    fn wrap(self) -> AesCtrOperation {
        AesCtrOperation::Setup(self)
    }

    fn unwrap_from(operation: AesCtrOperation) -> Option<Self> {
        match operation {
            AesCtrOperation::Setup(op) => Some(op),
            _ => None,
        }
    }
}

impl OperationPart<AesCtrOperation> for AesCtrSegment {
    fn wrap(self) -> AesCtrOperation {
        AesCtrOperation::Segment(self)
    }

    fn unwrap_from(operation: AesCtrOperation) -> Option<Self> {
        match operation {
            AesCtrOperation::Segment(op) => Some(op),
            _ => None,
        }
    }
}

/// AES-CTR family.
#[derive(Debug, Clone, Copy)]
pub struct AesCtr;

impl Family for AesCtr {
    const NAME: &'static str = "AESCTR";
    const ID: FamilyId = FamilyId::AES_CTR;
    const RESOURCE: Resource = Resource::Crypto;

    type MsgType = AesCtrMsg;
    type Operation = AesCtrOperation;
    type Params = ();
}

/// AES-CTR driver.
#[derive(Debug, Clone)]
pub struct AesCtrDriver<C, P = RefCountPower> {
    driver: Driver<AesCtr, C, P>,
}

impl<C: SecureChannel<AesCtr>, P: PowerManager> AesCtrDriver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<AesCtr, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<AesCtr, C, P> {
        &self.driver
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<AesCtr>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<AesCtr>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle)
    }

    /// Encrypt a whole message.
    pub fn one_step_encrypt(
        &self,
        handle: &Handle,
        operation: &mut AesCtrOneStep,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesCtrMsg::OneStepEncrypt, kind, operation)
    }

    /// Decrypt a whole message.
    pub fn one_step_decrypt(
        &self,
        handle: &Handle,
        operation: &mut AesCtrOneStep,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesCtrMsg::OneStepDecrypt, kind, operation)
    }

    /// Encrypt a whole message on an async handle.
    pub fn one_step_encrypt_async(
        &self,
        handle: &Handle,
        operation: AesCtrOneStep,
    ) -> Result<PendingOperation<AesCtr>, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part_async(&self.driver, handle, AesCtrMsg::OneStepEncrypt, kind, operation)
    }

    /// Start a segmented encryption.
    pub fn setup_encrypt(
        &self,
        handle: &Handle,
        setup: &mut AesCtrSetup,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesCtrMsg::SetupEncrypt, setup)
    }

    /// Start a segmented decryption.
    pub fn setup_decrypt(
        &self,
        handle: &Handle,
        setup: &mut AesCtrSetup,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesCtrMsg::SetupDecrypt, setup)
    }

    /// Process one segment.
    pub fn add_data(
        &self,
        handle: &Handle,
        segment: &mut AesCtrSegment,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesCtrMsg::AddData, OperationKind::AddData, segment)
    }

    /// Process the final segment.
    pub fn finalize(
        &self,
        handle: &Handle,
        segment: &mut AesCtrSegment,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesCtrMsg::Finalize, OperationKind::Finalize, segment)
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
        assert_eq!(AesCtrMsg::Open.code(), 0);
        assert_eq!(AesCtrMsg::Construct.code(), 1);
        assert_eq!(AesCtrMsg::Close.code(), 2);
        assert_eq!(AesCtrMsg::OneStepEncrypt.code(), 3);
        for code in 0..=10 {
            assert_eq!(AesCtrMsg::from_code(code).map(AesCtrMsg::code), Some(code));
        }
        assert_eq!(AesCtrMsg::from_code(11), None);
    }

    #[test]
    fn parts_unwrap_only_their_shape() {
        let segment = AesCtrSegment { input: vec![1, 2], output: Vec::new() };

        let wrapped = segment.clone().wrap();

        assert_eq!(AesCtrSegment::unwrap_from(wrapped.clone()), Some(segment));
        assert_eq!(AesCtrOneStep::unwrap_from(wrapped), None);
    }
}
