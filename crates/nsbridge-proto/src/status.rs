//! Status words.
//!
//! Two distinct status spaces cross the boundary:
//!
//! - [`Status`]: the driver result written into the output vector or carried
//!   by a completion notification.
//! - [`PsaStatus`]: the result of the secure call itself, before any driver
//!   logic ran. A non-success value means the message never reached (or was
//!   refused by) the family's dispatch function.

use std::fmt;

use crate::vec::Word;

/// Driver status word.
///
/// Codes `0..=-31` are shared by every family. Family-specific codes start at
/// [`Status::RESERVED`] and grow downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    /// Operation succeeded (or, for asynchronous modes, was accepted)
    pub const SUCCESS: Self = Self(0);
    /// Generic failure; also the sentinel the output word starts at
    pub const ERROR: Self = Self(-1);
    /// Hardware-access lock could not be taken within the timeout
    pub const RESOURCE_UNAVAILABLE: Self = Self(-2);
    /// Inputs rejected by the secure side
    pub const INVALID_INPUTS: Self = Self(-3);
    /// Operation canceled before it completed
    pub const CANCELED: Self = Self(-4);
    /// First family-specific code
    pub const RESERVED: Self = Self(-32);

    /// Family-specific status `offset` steps below [`Status::RESERVED`].
    pub const fn family_specific(offset: u8) -> Self {
        Self(Self::RESERVED.0 - offset as i32)
    }

    /// Wrap a raw status code.
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Raw status code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Decode the output-vector word.
    pub const fn from_word(word: Word) -> Self {
        Self(word as i32)
    }

    /// Encode as an output-vector word.
    pub const fn to_word(self) -> Word {
        self.0 as Word
    }

    /// True for [`Status::SUCCESS`].
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// True for codes in the family-specific range.
    pub const fn is_family_specific(self) -> bool {
        self.0 <= Self::RESERVED.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => f.write_str("SUCCESS"),
            Self::ERROR => f.write_str("ERROR"),
            Self::RESOURCE_UNAVAILABLE => f.write_str("RESOURCE_UNAVAILABLE"),
            Self::INVALID_INPUTS => f.write_str("INVALID_INPUTS"),
            Self::CANCELED => f.write_str("CANCELED"),
            Self(code) => write!(f, "STATUS({code})"),
        }
    }
}

/// Result of a secure call at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsaStatus(i32);

impl PsaStatus {
    /// Call was dispatched
    pub const SUCCESS: Self = Self(0);
    /// Malformed in/out vectors or unknown message type
    pub const PROGRAMMER_ERROR: Self = Self(-129);
    /// Secure service refused the connection
    pub const CONNECTION_REFUSED: Self = Self(-130);
    /// Secure service is busy
    pub const CONNECTION_BUSY: Self = Self(-131);
    /// Unspecified transport failure
    pub const GENERIC_ERROR: Self = Self(-132);
    /// Secure side could not allocate
    pub const INSUFFICIENT_MEMORY: Self = Self(-141);

    /// Wrap a raw PSA status.
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Raw PSA status.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// True for [`PsaStatus::SUCCESS`].
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Driver status the TRNG family reports for this transport status.
    ///
    /// Programmer errors surface as invalid inputs; every other failure is a
    /// generic error.
    pub const fn to_driver_status(self) -> Status {
        match self.0 {
            0 => Status::SUCCESS,
            -129 => Status::INVALID_INPUTS,
            _ => Status::ERROR,
        }
    }
}

impl fmt::Display for PsaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => f.write_str("PSA_SUCCESS"),
            Self::PROGRAMMER_ERROR => f.write_str("PSA_ERROR_PROGRAMMER_ERROR"),
            Self::CONNECTION_REFUSED => f.write_str("PSA_ERROR_CONNECTION_REFUSED"),
            Self::CONNECTION_BUSY => f.write_str("PSA_ERROR_CONNECTION_BUSY"),
            Self::GENERIC_ERROR => f.write_str("PSA_ERROR_GENERIC_ERROR"),
            Self::INSUFFICIENT_MEMORY => f.write_str("PSA_ERROR_INSUFFICIENT_MEMORY"),
            Self(code) => write!(f, "PSA({code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_codes_survive_word_encoding() {
        for status in [Status::ERROR, Status::CANCELED, Status::family_specific(3)] {
            assert_eq!(Status::from_word(status.to_word()), status);
        }
    }

    #[test]
    fn error_sentinel_is_all_ones() {
        assert_eq!(Status::ERROR.to_word(), u32::MAX);
    }

    #[test]
    fn family_specific_codes_start_at_reserved() {
        assert_eq!(Status::family_specific(0), Status::RESERVED);
        assert_eq!(Status::family_specific(1).code(), -33);
        assert!(Status::family_specific(1).is_family_specific());
        assert!(!Status::CANCELED.is_family_specific());
    }

    #[test]
    fn programmer_error_maps_to_invalid_inputs() {
        assert_eq!(PsaStatus::PROGRAMMER_ERROR.to_driver_status(), Status::INVALID_INPUTS);
        assert_eq!(PsaStatus::CONNECTION_BUSY.to_driver_status(), Status::ERROR);
        assert_eq!(PsaStatus::SUCCESS.to_driver_status(), Status::SUCCESS);
    }

    #[test]
    fn display_uses_symbolic_names() {
        assert_eq!(Status::CANCELED.to_string(), "CANCELED");
        assert_eq!(Status::from_code(-40).to_string(), "STATUS(-40)");
        assert_eq!(PsaStatus::CONNECTION_REFUSED.to_string(), "PSA_ERROR_CONNECTION_REFUSED");
    }
}
