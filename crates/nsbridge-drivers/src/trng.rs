//! True random number generator.
//!
//! The secure TRNG driver queues requests itself, so operations never take the
//! access lock. The power dependency on the TRNG domain is taken once by
//! `init` and held for the lifetime of the process.
//!
//! Transport failures are reported as driver statuses: a programmer error
//! becomes [`Status::INVALID_INPUTS`], anything else [`Status::ERROR`].

use nsbridge_core::{
    Completion, DependencyScope, Driver, DriverError, Family, Handle, HwConfig, OperationKind,
    Params, PendingOperation, PowerManager, RefCountPower, Resource, SecureChannel,
    Serialization,
};
use nsbridge_proto::{FamilyId, MessageType, Status};

use crate::{OperationPart, dispatch_part, dispatch_part_async, key::CryptoKey};

/// Entropy source failed its health test.
pub const STATUS_ENTROPY_FAILURE: Status = Status::family_specific(1);

/// Largest request the secure side accepts, in bytes.
pub const MAX_REQUEST_LEN: usize = 1024;

/// TRNG message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrngMsg {
    /// Open by index
    Open = 0,
    /// Construct from configuration
    Construct = 1,
    /// Close
    Close = 2,
    /// Register completion relay
    RegisterCallbacks = 3,
    /// Generate a key
    GenerateKey = 4,
    /// Fill a byte buffer
    GetRandomBytes = 5,
    /// Cancel in-flight operation
    CancelOperation = 6,
}

impl MessageType for TrngMsg {
    const FAMILY: &'static str = "TRNG";
    const OPEN: Self = Self::Open;
    const CONSTRUCT: Self = Self::Construct;
    const CLOSE: Self = Self::Close;
    const REGISTER_CALLBACK: Self = Self::RegisterCallbacks;
    const CANCEL_OPERATION: Self = Self::CancelOperation;

    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Open,
            1 => Self::Construct,
            2 => Self::Close,
            3 => Self::RegisterCallbacks,
            4 => Self::GenerateKey,
            5 => Self::GetRandomBytes,
            6 => Self::CancelOperation,
            _ => return None,
        })
    }
}

/// Key generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrngKey {
    /// Key slot; [`CryptoKey::Blank`] on input, filled on output
    pub key: CryptoKey,
}

/// Random bytes request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomBytes {
    /// Requested length in bytes
    pub len: usize,
    /// Random bytes, written by the secure side
    pub bytes: Vec<u8>,
}

impl RandomBytes {
    /// Request for `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { len, bytes: Vec::new() }
    }
}

/// TRNG operation handed to the secure side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrngOperation {
    /// See [`TrngKey`]
    Key(TrngKey),
    /// See [`RandomBytes`]
    Bytes(RandomBytes),
}

impl OperationPart<TrngOperation> for TrngKey {
    fn wrap(self) -> TrngOperation {
        TrngOperation::Key(self)
    }

    fn unwrap_from(operation: TrngOperation) -> Option<Self> {
        match operation {
            TrngOperation::Key(op) => Some(op),
            TrngOperation::Bytes(_) => None,
        }
    }
}

impl OperationPart<TrngOperation> for RandomBytes {
    fn wrap(self) -> TrngOperation {
        TrngOperation::Bytes(self)
    }

    fn unwrap_from(operation: TrngOperation) -> Option<Self> {
        match operation {
            TrngOperation::Bytes(op) => Some(op),
            TrngOperation::Key(_) => None,
        }
    }
}

/// TRNG family.
#[derive(Debug, Clone, Copy)]
pub struct Trng;

impl Family for Trng {
    const NAME: &'static str = "TRNG";
    const ID: FamilyId = FamilyId::TRNG;
    const RESOURCE: Resource = Resource::Trng;
    const DEPENDENCY: DependencyScope = DependencyScope::AtInit;
    const SERIALIZATION: Serialization = Serialization::Queued;

    type MsgType = TrngMsg;
    type Operation = TrngOperation;
    type Params = ();
}

/// Report transport failures as driver statuses.
fn map_transport(error: DriverError) -> DriverError {
    match error {
        DriverError::Channel(channel) => {
            DriverError::Failed(channel.psa_status().to_driver_status())
        },
        other => other,
    }
}

fn check_request_len(len: usize) -> Result<(), DriverError> {
    if len > MAX_REQUEST_LEN {
        tracing::debug!(len, max = MAX_REQUEST_LEN, "random bytes request too large");
        return Err(DriverError::Failed(Status::INVALID_INPUTS));
    }
    Ok(())
}

/// TRNG driver.
#[derive(Debug, Clone)]
pub struct TrngDriver<C, P = RefCountPower> {
    driver: Driver<Trng, C, P>,
}

impl<C: SecureChannel<Trng>, P: PowerManager> TrngDriver<C, P> {
    /// Wrap a core driver.
    pub fn new(driver: Driver<Trng, C, P>) -> Self {
        Self { driver }
    }

    /// Underlying core driver.
    pub fn inner(&self) -> &Driver<Trng, C, P> {
        &self.driver
    }

    /// Initialize the family and take the TRNG power dependency. Idempotent.
    pub fn init(&self) {
        self.driver.init();
    }

    /// Open instance `index`.
    pub fn open(&self, index: u8, params: Option<Params<Trng>>) -> Result<Handle, DriverError> {
        self.driver.open(index, params).map_err(map_transport)
    }

    /// Construct an instance from `config`.
    pub fn construct(
        &self,
        config: &HwConfig,
        params: Option<Params<Trng>>,
    ) -> Result<Handle, DriverError> {
        self.driver.construct(config, params).map_err(map_transport)
    }

    /// Close `handle`.
    pub fn close(&self, handle: Handle) -> Result<(), DriverError> {
        self.driver.close(handle).map_err(map_transport)
    }

    /// Generate key material into `request.key`.
    pub fn generate_key(
        &self,
        handle: &Handle,
        request: &mut TrngKey,
    ) -> Result<Completion, DriverError> {
        dispatch_part(&self.driver, handle, TrngMsg::GenerateKey, OperationKind::OneStep, request)
            .map_err(map_transport)
    }

    /// Fill `request.bytes` with `request.len` random bytes.
    ///
    /// # Errors
    ///
    /// `DriverError::Failed(Status::INVALID_INPUTS)` for requests above
    /// [`MAX_REQUEST_LEN`], without contacting the secure side.
    pub fn get_random_bytes(
        &self,
        handle: &Handle,
        request: &mut RandomBytes,
    ) -> Result<Completion, DriverError> {
        check_request_len(request.len)?;
        let kind = OperationKind::OneStep;
        dispatch_part(&self.driver, handle, TrngMsg::GetRandomBytes, kind, request)
            .map_err(map_transport)
    }

    /// Fill random bytes on an async handle.
    pub fn get_random_bytes_async(
        &self,
        handle: &Handle,
        request: RandomBytes,
    ) -> Result<PendingOperation<Trng>, DriverError> {
        check_request_len(request.len)?;
        let kind = OperationKind::OneStep;
        dispatch_part_async(&self.driver, handle, TrngMsg::GetRandomBytes, kind, request)
            .map_err(map_transport)
    }

    /// Cancel the in-flight operation.
    pub fn cancel_operation(&self, handle: &Handle) -> Result<(), DriverError> {
        self.driver.cancel_operation(handle).map_err(map_transport)
    }
}

#[cfg(test)]
mod tests {
    use nsbridge_core::ChannelError;
    use nsbridge_proto::PsaStatus;

    use super::*;

    #[test]
    fn programmer_error_reads_as_invalid_inputs() {
        let error = DriverError::Channel(ChannelError::Rejected(PsaStatus::PROGRAMMER_ERROR));
        assert_eq!(map_transport(error), DriverError::Failed(Status::INVALID_INPUTS));
    }

    #[test]
    fn other_transport_failures_read_as_error() {
        let error = DriverError::Channel(ChannelError::Unavailable);
        assert_eq!(map_transport(error), DriverError::Failed(Status::ERROR));

        let untouched = DriverError::ResourceUnavailable;
        assert_eq!(map_transport(untouched), DriverError::ResourceUnavailable);
    }
}
