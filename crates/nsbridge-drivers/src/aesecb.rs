//! AES in electronic codebook mode.
//!
//! Shares the accelerator, and therefore the access lock, with AES-CTR.

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, HwConfig, OperationKind, Params,
    PowerManager, RefCountPower, Resource, SecureChannel,
};
use nsbridge_proto::{FamilyId, MessageType};

use crate::{OperationPart, call_part, dispatch_part, key::CryptoKey};

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// AES-ECB message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AesEcbMsg {
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

impl MessageType for AesEcbMsg {
    const FAMILY: &'static str = "AESECB";
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

/// AES-ECB operation: key plus whole-block input and output.
///
/// The key is ignored for segments; it is taken from the preceding setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AesEcbOperation {
    /// Key
    pub key: CryptoKey,
    /// Input, a multiple of [`BLOCK_LEN`]
    pub input: Vec<u8>,
    /// Output, written by the secure side
    pub output: Vec<u8>,
}

impl OperationPart<AesEcbOperation> for AesEcbOperation {
    fn wrap(self) -> AesEcbOperation {
        self
    }

    fn unwrap_from(operation: AesEcbOperation) -> Option<Self> {
        Some(operation)
    }
}

/// AES-ECB family.
#[derive(Debug, Clone, Copy)]
pub struct AesEcb;

impl Family for AesEcb {
    const NAME: &'static str = "AESECB";
    const ID: FamilyId = FamilyId::AES_ECB;
    const RESOURCE: Resource = Resource::Crypto;

    type MsgType = AesEcbMsg;
    type Operation = AesEcbOperation;
    type Params = ();
}

/// AES-ECB driver.
#[derive(Debug, Clone)]
pub struct AesEcbDriver<C, P = RefCountPower> {
    driver: Driver<AesEcb, C, P>,
}

impl<C: SecureChannel<AesEcb>, P: PowerManager> AesEcbDriver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<AesEcb, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<AesEcb, C, P> {
        &self.driver
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<AesEcb>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<AesEcb>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle)
    }

    /// Encrypt whole blocks.
    pub fn one_step_encrypt(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesEcbMsg::OneStepEncrypt, kind, operation)
    }

    /// Decrypt whole blocks.
    pub fn one_step_decrypt(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, AesEcbMsg::OneStepDecrypt, kind, operation)
    }

    /// Start a segmented encryption with `operation.key`.
    pub fn setup_encrypt(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesEcbMsg::SetupEncrypt, operation)
    }

    /// Start a segmented decryption with `operation.key`.
    pub fn setup_decrypt(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<(), DriverError> {
        call_part(&self.driver, handle, AesEcbMsg::SetupDecrypt, operation)
    }

    /// Process one segment.
    pub fn add_data(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesEcbMsg::AddData, OperationKind::AddData, operation)
    }

    /// Process the final segment.
    pub fn finalize(
        &self,
        handle: &Handle,
        operation: &mut AesEcbOperation,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, AesEcbMsg::Finalize, OperationKind::Finalize, operation)
    }

    /// Cancel the in-flight operation.
    pub fn cancel_operation(&self, handle: &Handle) -> Result<(), DriverError> {
        self.driver.cancel_operation(handle)
    }
}
