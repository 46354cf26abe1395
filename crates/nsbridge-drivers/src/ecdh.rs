//! Elliptic-curve Diffie-Hellman.
//!
//! The secure ECDH driver runs on the public-key accelerator and always
//! completes through the relay, including for polling callers: the dispatcher
//! registers a relay for polling handles too and spins until it reports
//! completion.

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, HwConfig, OperationKind, Params,
    PendingOperation, PollingCompletion, PowerManager, RefCountPower, Resource, SecureChannel,
};
use nsbridge_proto::{FamilyId, MessageType, Status};

use crate::{OperationPart, dispatch_part, dispatch_part_async, key::CryptoKey};

/// Peer public key is not a point on the curve.
pub const STATUS_POINT_AT_INFINITY: Status = Status::family_specific(1);

/// Private key out of range for the curve.
pub const STATUS_PRIVATE_KEY_LARGER_THAN_ORDER: Status = Status::family_specific(2);

/// Curve of an ECDH instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256
    #[default]
    NistP256,
    /// NIST P-384
    NistP384,
    /// Curve25519
    Curve25519,
}

impl Curve {
    /// Scalar length in bytes.
    pub const fn scalar_len(self) -> usize {
        match self {
            Self::NistP256 | Self::Curve25519 => 32,
            Self::NistP384 => 48,
        }
    }

    /// Encoded public key length in bytes.
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::NistP256 | Self::NistP384 => 1 + 2 * self.scalar_len(),
            Self::Curve25519 => 32,
        }
    }
}

/// ECDH open parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EcdhParams {
    /// Curve
    pub curve: Curve,
}

/// ECDH message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EcdhMsg {
    /// Open by index
    Open = 0,
    /// Construct from configuration
    Construct = 1,
    /// Close
    Close = 2,
    /// Register completion relay
    RegisterCallback = 3,
    /// Derive public key from private key
    GeneratePublicKey = 4,
    /// Derive shared secret
    ComputeSharedSecret = 5,
    /// Cancel in-flight operation
    CancelOperation = 6,
}

impl MessageType for EcdhMsg {
    const FAMILY: &'static str = "ECDH";
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
            4 => Self::GeneratePublicKey,
            5 => Self::ComputeSharedSecret,
            6 => Self::CancelOperation,
            _ => return None,
        })
    }
}

/// Public key generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratePublicKey {
    /// Private key
    pub private_key: CryptoKey,
    /// Public key, written by the secure side
    pub public_key: Vec<u8>,
}

/// Shared secret computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeSharedSecret {
    /// Own private key
    pub private_key: CryptoKey,
    /// Peer's encoded public key
    pub peer_public_key: Vec<u8>,
    /// Shared secret, written by the secure side
    pub shared_secret: Vec<u8>,
}

/// ECDH operation handed to the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcdhOperation {
    /// See [`GeneratePublicKey`]
    PublicKey(GeneratePublicKey),
    /// See [`ComputeSharedSecret`]
    SharedSecret(ComputeSharedSecret),
}

impl OperationPart<EcdhOperation> for GeneratePublicKey {
    fn wrap(self) -> EcdhOperation {
        EcdhOperation::PublicKey(self)
    }

    fn unwrap_from(operation: EcdhOperation) -> Option<Self> {
        match operation {
            EcdhOperation::PublicKey(op) => Some(op),
            EcdhOperation::SharedSecret(_) => None,
        }
    }
}

impl OperationPart<EcdhOperation> for ComputeSharedSecret {
    fn wrap(self) -> EcdhOperation {
        EcdhOperation::SharedSecret(self)
    }

    fn unwrap_from(operation: EcdhOperation) -> Option<Self> {
        match operation {
            EcdhOperation::SharedSecret(op) => Some(op),
            EcdhOperation::PublicKey(_) => None,
        }
    }
}

/// ECDH family.
#[derive(Debug, Clone, Copy)]
pub struct Ecdh;

impl Family for Ecdh {
    const NAME: &'static str = "ECDH";
    const ID: FamilyId = FamilyId::ECDH;
    const RESOURCE: Resource = Resource::Pka;
    const POLLING: PollingCompletion = PollingCompletion::Relayed;

    type MsgType = EcdhMsg;
    type Operation = EcdhOperation;
    type Params = EcdhParams;
}

/// ECDH driver.
#[derive(Debug, Clone)]
pub struct EcdhDriver<C, P = RefCountPower> {
    driver: Driver<Ecdh, C, P>,
}

impl<C: SecureChannel<Ecdh>, P: PowerManager> EcdhDriver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<Ecdh, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<Ecdh, C, P> {
        &self.driver
    }

    /// Initialize the family. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<Ecdh>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<Ecdh>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle)
    }

    /// Derive the public key of `operation.private_key`.
    pub fn generate_public_key(
        &self,
        handle: &Handle,
        operation: &mut GeneratePublicKey,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, EcdhMsg::GeneratePublicKey, kind, operation)
    }

    /// Derive the shared secret with a peer.
    pub fn compute_shared_secret(
        &self,
        handle: &Handle,
        operation: &mut ComputeSharedSecret,
    ) -> Result<Completion, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, EcdhMsg::ComputeSharedSecret, kind, operation)
    }

    /// Derive the shared secret on an async handle.
    pub fn compute_shared_secret_async(
        &self,
        handle: &Handle,
        operation: ComputeSharedSecret,
    ) -> Result<PendingOperation<Ecdh>, DriverError> {
        let kind = OperationKind::OneStep;
        dispatch_part_async(&self.driver, handle, EcdhMsg::ComputeSharedSecret, kind, operation)
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
    fn public_key_lengths() {
        assert_eq!(Curve::NistP256.public_key_len(), 65);
        assert_eq!(Curve::NistP384.public_key_len(), 97);
        assert_eq!(Curve::Curve25519.public_key_len(), 32);
    }
}
