//! Per-family message-type codes.
//!
//! Each algorithm family owns an enum of message types whose `u8` codes are
//! stable within the family. Codes of different families overlap freely: the
//! secure side routes by family first.
//!
//! Every family must name the five lifecycle messages the dispatcher sends on
//! its own; operation messages are family-defined.

use std::fmt::Debug;

use crate::error::ProtoError;

/// A family's message-type enum.
pub trait MessageType: Copy + Debug + Eq + Send + Sync + 'static {
    /// Family name used in errors and logs
    const FAMILY: &'static str;

    /// Open a statically configured instance by index
    const OPEN: Self;
    /// Construct an instance from caller-supplied configuration
    const CONSTRUCT: Self;
    /// Close an instance
    const CLOSE: Self;
    /// Register the completion relay of an instance
    const REGISTER_CALLBACK: Self;
    /// Cancel the in-flight operation of an instance
    const CANCEL_OPERATION: Self;

    /// Stable wire code.
    fn code(self) -> u8;

    /// Decode a wire code, `None` if undefined.
    fn from_code(code: u8) -> Option<Self>;

    /// Decode a wire code.
    ///
    /// # Errors
    ///
    /// `ProtoError::UnknownMessageType` if `code` is not defined for the family.
    fn decode(code: u8) -> Result<Self, ProtoError> {
        Self::from_code(code).ok_or(ProtoError::UnknownMessageType { family: Self::FAMILY, code })
    }
}
