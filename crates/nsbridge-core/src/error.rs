//! Error types for the non-secure bridge.
//!
//! Three layers, kept apart so callers can tell them apart:
//!
//! - [`ChannelError`]: the secure call itself failed. No driver logic ran.
//! - [`PowerError`]: power bookkeeping went out of balance.
//! - [`DriverError`]: what an application sees from open/close/dispatch.

use nsbridge_proto::{HandleId, PsaStatus, ReturnMode, Status};
use thiserror::Error;

/// Transport-level failure of a secure call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Secure side rejected the call before dispatching it
    #[error("secure call rejected: {0}")]
    Rejected(PsaStatus),

    /// No secure partition is reachable
    #[error("secure partition unavailable")]
    Unavailable,
}

impl ChannelError {
    /// PSA status equivalent of this failure.
    pub fn psa_status(&self) -> PsaStatus {
        match self {
            Self::Rejected(status) => *status,
            Self::Unavailable => PsaStatus::CONNECTION_REFUSED,
        }
    }
}

/// Power bookkeeping failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerError {
    /// Released more times than it was set
    #[error("{name} released with zero references")]
    Underflow {
        /// Resource or constraint name
        name: &'static str,
    },
}

/// Errors returned by driver entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// `open`/`construct` called before `init`
    #[error("{family} driver not initialized")]
    NotInitialized {
        /// Family name
        family: &'static str,
    },

    /// Hardware-access lock not acquired within the handle's timeout
    #[error("hardware access lock unavailable")]
    ResourceUnavailable,

    /// Handle is closed, stale, or belongs to another family
    #[error("invalid handle {0}")]
    InvalidHandle(HandleId),

    /// Secure side returned the NULL handle
    #[error("secure side refused to open {family} instance")]
    OpenRejected {
        /// Family name
        family: &'static str,
    },

    /// Relay registration failed after the secure side opened the handle
    #[error("callback registration for {handle} failed: {source}")]
    RegistrationFailed {
        /// Handle that was opened and then leaked
        handle: HandleId,
        /// Transport failure
        source: ChannelError,
    },

    /// Secure side issued a handle whose slot is still live
    #[error("handle slot for {0} is occupied")]
    SlotOccupied(HandleId),

    /// Entry point does not match the handle's return behavior
    #[error("handle opened with {actual:?}, entry point requires {expected}")]
    WrongReturnBehavior {
        /// Required behavior
        expected: &'static str,
        /// Behavior the handle was opened with
        actual: ReturnMode,
    },

    /// Secure call failed at the transport level
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Secure side reported a non-success driver status
    #[error("operation failed with {0}")]
    Failed(Status),

    /// Handle closed while an async operation was pending
    #[error("completion channel closed before the operation finished")]
    Disconnected,
}

impl DriverError {
    /// Returns true if retrying the same call may succeed.
    ///
    /// Only lock contention is retryable. Secure-side failures are final for
    /// the operation that produced them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable)
    }

    /// Driver status word equivalent, for callers that speak status codes.
    pub fn status(&self) -> Status {
        match self {
            Self::ResourceUnavailable => Status::RESOURCE_UNAVAILABLE,
            Self::Failed(status) => *status,
            Self::InvalidHandle(_) | Self::WrongReturnBehavior { .. } => Status::INVALID_INPUTS,
            _ => Status::ERROR,
        }
    }
}
