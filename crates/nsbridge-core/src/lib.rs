//! Non-secure dispatch and completion protocol for partitioned crypto
//! drivers.
//!
//! Crypto accelerators live in the secure partition. Application code runs in
//! the non-secure world and reaches a driver only through a one-in/one-out
//! secure call. This crate is the non-secure half of every such driver,
//! written once and parameterized over an algorithm [`Family`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── Driver<F, C, P> ────────────────────────┐
//! │  InitGate   HandleTable<F>   ──► Entry ──► Relay (trampoline)    │
//! │                 │                              ▲                 │
//! │            dispatch()                          │ post()          │
//! │                 ▼                              │                 │
//! │  AccessLock ── PowerManager ── SecureChannel<F> ─► secure side   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Driver`]: open/construct/close, operation dispatch, cancel
//! - [`Relay`]: per-handle completion relay the secure side posts to
//! - [`AccessLock`]: binary lock serializing one accelerator
//! - [`PowerManager`]: dependency and constraint bookkeeping
//! - [`SecureChannel`]: transport seam into the secure partition
//!
//! # Invariants
//!
//! - At most one operation per accelerator holds the [`AccessLock`].
//! - Every standby constraint set at dispatch is released exactly once.
//! - Every power dependency set at open is released at close.
//! - A stale or foreign handle never resolves to a live entry.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod family;
pub mod gate;
pub mod message;
pub mod power;
pub mod relay;
pub mod sync;
mod table;

pub use channel::SecureChannel;
pub use config::{CallbackFxn, DriverConfig, HwConfig, Params, ReturnBehavior};
pub use driver::{Completion, Driver, Handle, PendingOperation};
pub use error::{ChannelError, DriverError, PowerError};
pub use family::{DependencyScope, Family, PollingCompletion, Serialization};
pub use gate::InitGate;
pub use message::{Message, OperationKind};
pub use power::{Constraint, PowerManager, PowerStats, RefCountPower, Resource};
pub use relay::{Notification, Relay, SecureCallback};
pub use sync::{AccessLock, LockStats, Semaphore, Timeout};
