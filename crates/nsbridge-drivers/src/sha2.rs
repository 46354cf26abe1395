//! SHA-2 hashing and HMAC.
//!
//! Hash data and HMAC run through the access lock like every accelerator
//! operation. `set_hash_type` only updates secure-side state and is sent
//! directly; `reset` is fire-and-forget.

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, HwConfig, OperationKind, Params,
    PendingOperation, PowerManager, RefCountPower, Resource, SecureChannel,
};
use nsbridge_proto::{FamilyId, MessageType, Status};

use crate::{OperationPart, call_part, dispatch_part, dispatch_part_async, key::CryptoKey};

/// Hash type not supported by the accelerator.
pub const STATUS_UNSUPPORTED: Status = Status::family_specific(1);

/// SHA-2 digest variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashType {
    /// SHA-224
    Sha224,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashType {
    /// Digest length in bytes.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Internal block length in bytes.
    pub const fn block_len(self) -> usize {
        match self {
            Self::Sha224 | Self::Sha256 => 64,
            Self::Sha384 | Self::Sha512 => 128,
        }
    }
}

/// SHA-2 open parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sha2Params {
    /// Initial hash type
    pub hash_type: HashType,
}

/// SHA-2 message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Sha2Msg {
    /// Open by index
    Open = 0,
    /// Construct from configuration
    Construct = 1,
    /// Close
    Close = 2,
    /// One-step hash
    HashData = 3,
    /// Segment
    AddData = 4,
    /// Digest of all segments
    Finalize = 5,
    /// HMAC setup
    SetupHmac = 6,
    /// HMAC of all segments
    FinalizeHmac = 7,
    /// One-step HMAC
    Hmac = 8,
    /// Discard segment state
    Reset = 9,
    /// Change the hash type
    SetHashType = 10,
    /// Cancel in-flight operation
    CancelOperation = 11,
    /// Register completion relay
    RegisterCallback = 12,
}

impl MessageType for Sha2Msg {
    const FAMILY: &'static str = "SHA2";
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
            3 => Self::HashData,
            4 => Self::AddData,
            5 => Self::Finalize,
            6 => Self::SetupHmac,
            7 => Self::FinalizeHmac,
            8 => Self::Hmac,
            9 => Self::Reset,
            10 => Self::SetHashType,
            11 => Self::CancelOperation,
            12 => Self::RegisterCallback,
            _ => return None,
        })
    }
}

/// Hash input and digest output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sha2Digest {
    /// Data to hash; empty for finalize-only calls
    pub data: Vec<u8>,
    /// Digest, written by the secure side on one-step and finalize
    pub digest: Vec<u8>,
}

/// HMAC key, input, and MAC output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sha2Hmac {
    /// HMAC key; only read by one-step HMAC and setup
    pub key: CryptoKey,
    /// Data to authenticate
    pub data: Vec<u8>,
    /// MAC, written by the secure side
    pub mac: Vec<u8>,
}

/// SHA-2 operation handed to the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sha2Operation {
    /// See [`Sha2Digest`]
    Digest(Sha2Digest),
    /// See [`Sha2Hmac`]
    Hmac(Sha2Hmac),
    /// New hash type
    HashType(HashType),
}

impl OperationPart<Sha2Operation> for Sha2Digest {
    fn wrap(self) -> Sha2Operation {
        Sha2Operation::Digest(self)
    }

    fn unwrap_from(operation: Sha2Operation) -> Option<Self> {
        match operation {
            Sha2Operation::Digest(op) => Some(op),
            _ => None,
        }
    }
}

impl OperationPart<Sha2Operation> for Sha2Hmac {
    fn wrap(self) -> Sha2Operation {
        Sha2Operation::Hmac(self)
    }

    fn unwrap_from(operation: Sha2Operation) -> Option<Self> {
        match operation {
            Sha2Operation::Hmac(op) => Some(op),
            _ => None,
        }
    }
}

impl OperationPart<Sha2Operation> for HashType {
    fn wrap(self) -> Sha2Operation {
        Sha2Operation::HashType(self)
    }

    fn unwrap_from(operation: Sha2Operation) -> Option<Self> {
        match operation {
            Sha2Operation::HashType(hash_type) => Some(hash_type),
            _ => None,
        }
    }
}

/// SHA-2 family.
#[derive(Debug, Clone, Copy)]
pub struct Sha2;

impl Family for Sha2 {
    const NAME: &'static str = "SHA2";
    const ID: FamilyId = FamilyId::SHA2;
    const RESOURCE: Resource = Resource::Crypto;

    type MsgType = Sha2Msg;
    type Operation = Sha2Operation;
    type Params = Sha2Params;
}

/// SHA-2 driver.
#[derive(Debug, Clone)]
pub struct Sha2Driver<C, P = RefCountPower> {
    driver: Driver<Sha2, C, P>,
}

impl<C: SecureChannel<Sha2>, P: PowerManager> Sha2Driver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<Sha2, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<Sha2, C, P> {
        &self.driver
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<Sha2>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<Sha2>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle)
    }

    /// Hash `digest.data` in one step.
    pub fn hash_data(
        &self,
        handle: &Handle,
        digest: &mut Sha2Digest,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::HashData, OperationKind::OneStep, digest)
    }

    /// Hash `digest.data` in one step on an async handle.
    pub fn hash_data_async(
        &self,
        handle: &Handle,
        digest: Sha2Digest,
    ) -> Result<PendingOperation<Sha2>, DriverError> {
        dispatch_part_async(&self.driver, handle, Sha2Msg::HashData, OperationKind::OneStep, digest)
    }

    /// Feed one segment.
    pub fn add_data(
        &self,
        handle: &Handle,
        digest: &mut Sha2Digest,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::AddData, OperationKind::AddData, digest)
    }

    /// Produce the digest of all segments.
    pub fn finalize(
        &self,
        handle: &Handle,
        digest: &mut Sha2Digest,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::Finalize, OperationKind::Finalize, digest)
    }

    /// Start a segmented HMAC with `hmac.key`.
    pub fn setup_hmac(
        &self,
        handle: &Handle,
        hmac: &mut Sha2Hmac,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::SetupHmac, OperationKind::Setup, hmac)
    }

    /// Produce the MAC of all segments.
    pub fn finalize_hmac(
        &self,
        handle: &Handle,
        hmac: &mut Sha2Hmac,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::FinalizeHmac, OperationKind::Finalize, hmac)
    }

    /// Authenticate `hmac.data` in one step.
    pub fn hmac(&self, handle: &Handle, hmac: &mut Sha2Hmac) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, Sha2Msg::Hmac, OperationKind::OneStep, hmac)
    }

    /// Discard segment state.
    pub fn reset(&self, handle: &Handle) -> Result<(), DriverError> {
        self.driver.reset(handle, Sha2Msg::Reset)
    }

    /// Change the hash type of subsequent operations.
    pub fn set_hash_type(&self, handle: &Handle, hash_type: HashType) -> Result<(), DriverError> {
        let mut hash_type = hash_type;
        call_part(&self.driver, handle, Sha2Msg::SetHashType, &mut hash_type)
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
    fn digest_lengths_match_variant() {
        assert_eq!(HashType::Sha224.digest_len(), 28);
        assert_eq!(HashType::default().digest_len(), 32);
        assert_eq!(HashType::Sha512.block_len(), 128);
    }

    #[test]
    fn every_code_round_trips() {
        for code in 0..=12 {
            assert_eq!(Sha2Msg::from_code(code).map(Sha2Msg::code), Some(code));
        }
        assert!(Sha2Msg::decode(13).is_err());
    }
}
