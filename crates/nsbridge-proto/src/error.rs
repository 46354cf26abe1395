//! Decoding errors for boundary words.

use thiserror::Error;

/// Errors produced when a word read from the boundary does not decode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    /// Handle word was zero (the NULL handle)
    #[error("null handle word")]
    NullHandle,

    /// Family identifier of a handle was zero
    #[error("handle word {0:#010x} carries no family id")]
    MissingFamily(u32),

    /// Handle belongs to a different algorithm family
    #[error("handle family {actual:#04x} does not match expected {expected:#04x}")]
    FamilyMismatch {
        /// Family the caller expected
        expected: u8,
        /// Family found in the handle word
        actual: u8,
    },

    /// Message-type code is not defined for the family
    #[error("unknown message type {code} for {family}")]
    UnknownMessageType {
        /// Family name
        family: &'static str,
        /// Undefined code
        code: u8,
    },

    /// Return-mode code is not one of the defined modes
    #[error("unknown return mode {0:#04x}")]
    UnknownReturnMode(u8),
}
