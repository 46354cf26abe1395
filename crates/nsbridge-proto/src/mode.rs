//! Return-mode codes carried in open parameters.

use crate::error::ProtoError;

/// How the caller learns that an operation finished.
///
/// The secure side only ever sees these three codes; the non-secure
/// future-based path is sent as [`ReturnMode::Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReturnMode {
    /// Completion is delivered through the registered relay
    Callback = 0x01,
    /// Caller pends on a semaphore until the relay posts it
    Blocking = 0x02,
    /// Caller polls; the call returns once the operation is done
    Polling = 0x04,
}

impl ReturnMode {
    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code.
    pub const fn from_code(code: u8) -> Result<Self, ProtoError> {
        match code {
            0x01 => Ok(Self::Callback),
            0x02 => Ok(Self::Blocking),
            0x04 => Ok(Self::Polling),
            other => Err(ProtoError::UnknownReturnMode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_decode_to_their_mode() {
        for mode in [ReturnMode::Callback, ReturnMode::Blocking, ReturnMode::Polling] {
            assert_eq!(ReturnMode::from_code(mode.code()), Ok(mode));
        }
    }

    #[test]
    fn undefined_code_is_rejected() {
        assert_eq!(ReturnMode::from_code(0x03), Err(ProtoError::UnknownReturnMode(0x03)));
    }
}
