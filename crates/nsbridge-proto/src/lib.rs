//! Boundary ABI between non-secure crypto drivers and the secure partition.
//!
//! Everything that crosses the isolation boundary is defined here: the handle
//! word returned by the secure side, status words written into the output
//! vector, the PSA call status returned by the transport itself, return-mode
//! codes, per-family message-type codes, and the one-in/one-out vector pair.
//!
//! # Wire Shape
//!
//! ```text
//! non-secure                        secure
//! ┌────────────┐  msg_type (u8)   ┌──────────────┐
//! │ dispatcher │ ───────────────► │ dispatch fn  │
//! │            │  InVec  [msg]    │              │
//! │            │ ───────────────► │ validates    │
//! │            │  OutVec [word]   │ in/out sizes │
//! │            │ ◄─────────────── │              │
//! └────────────┘  PsaStatus       └──────────────┘
//! ```
//!
//! The crate carries no logic beyond encoding. Operation semantics live in
//! `nsbridge-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod handle;
pub mod message;
pub mod mode;
pub mod status;
pub mod vec;

pub use error::ProtoError;
pub use handle::{FamilyId, HandleId};
pub use message::MessageType;
pub use mode::ReturnMode;
pub use status::{PsaStatus, Status};
pub use vec::{InVec, OutVec, Word};
