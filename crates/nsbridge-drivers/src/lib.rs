//! Crypto driver families bridged to the secure partition.
//!
//! Each module instantiates the `nsbridge-core` dispatch protocol for one
//! algorithm family and wraps it in a typed facade:
//!
//! | Family        | Serialization | Polling completion | Power resource |
//! |---------------|---------------|--------------------|----------------|
//! | [`aesccm`]    | access lock   | synchronous        | crypto         |
//! | [`aesctr`]    | access lock   | synchronous        | crypto         |
//! | [`aesecb`]    | access lock   | synchronous        | crypto         |
//! | [`sha2`]      | access lock   | synchronous        | crypto         |
//! | [`trng`]      | secure queue  | synchronous        | TRNG (at init) |
//! | [`ecdh`]      | access lock   | relayed            | PKA            |
//!
//! A family's operation type is an enum over the shapes its entry points
//! accept. Facade methods take the concrete shape and move it in and out of
//! the enum around the dispatch, so callers never match on the enum for
//! synchronous calls.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aesccm;
pub mod aesctr;
pub mod aesecb;
pub mod ecdh;
pub mod key;
pub mod sha2;
pub mod trng;

use std::mem;

use nsbridge_core::{
    Completion, Driver, DriverError, Family, Handle, OperationKind, PendingOperation,
    PowerManager, SecureChannel,
};

pub use aesccm::{AesCcm, AesCcmDriver};
pub use aesctr::{AesCtr, AesCtrDriver};
pub use aesecb::{AesEcb, AesEcbDriver};
pub use ecdh::{Ecdh, EcdhDriver};
pub use key::{CryptoKey, KeyError};
pub use sha2::{Sha2, Sha2Driver};
pub use trng::{Trng, TrngDriver};

/// One shape of a family's operation enum.
pub trait OperationPart<O>: Default + Sized {
    /// Wrap into the family operation.
    fn wrap(self) -> O;

    /// Unwrap from the family operation, `None` for another shape.
    fn unwrap_from(operation: O) -> Option<Self>;
}

/// Dispatch `part` through the access lock, writing results back into it.
pub(crate) fn dispatch_part<F, C, P, T>(
    driver: &Driver<F, C, P>,
    handle: &Handle,
    msg_type: F::MsgType,
    kind: OperationKind,
    part: &mut T,
) -> Result<Completion, DriverError>
where
    F: Family,
    C: SecureChannel<F>,
    P: PowerManager,
    T: OperationPart<F::Operation>,
{
    let mut operation = mem::take(part).wrap();
    let result = driver.dispatch(handle, msg_type, kind, &mut operation);
    if let Some(done) = T::unwrap_from(operation) {
        *part = done;
    }
    result
}

/// Send `part` as a control message, writing results back into it.
pub(crate) fn call_part<F, C, P, T>(
    driver: &Driver<F, C, P>,
    handle: &Handle,
    msg_type: F::MsgType,
    part: &mut T,
) -> Result<(), DriverError>
where
    F: Family,
    C: SecureChannel<F>,
    P: PowerManager,
    T: OperationPart<F::Operation>,
{
    let mut operation = mem::take(part).wrap();
    let result = driver.call_direct(handle, msg_type, &mut operation);
    if let Some(done) = T::unwrap_from(operation) {
        *part = done;
    }
    result
}

/// Dispatch `part` on an async handle.
pub(crate) fn dispatch_part_async<F, C, P, T>(
    driver: &Driver<F, C, P>,
    handle: &Handle,
    msg_type: F::MsgType,
    kind: OperationKind,
    part: T,
) -> Result<PendingOperation<F>, DriverError>
where
    F: Family,
    C: SecureChannel<F>,
    P: PowerManager,
    T: OperationPart<F::Operation>,
{
    driver.dispatch_async(handle, msg_type, kind, part.wrap())
}
