//! Secure call channel.
//!
//! The single crossing point into the secure partition. A call carries one
//! message-type code, one input block, and at most one output word. It may run
//! arbitrary secure-side logic before returning, but it never waits for the
//! hardware: asynchronous completions arrive later through the relay
//! registered with `REGISTER_CALLBACK`.

use std::sync::Arc;

use nsbridge_proto::{InVec, OutVec};

use crate::{error::ChannelError, family::Family, message::Message};

/// Transport into one family's secure dispatch function.
pub trait SecureChannel<F: Family>: Send + Sync + 'static {
    /// Prepare the transport. Called once from the driver's init gate.
    fn init(&self) {}

    /// Perform one secure call.
    ///
    /// # Errors
    ///
    /// `ChannelError` if the call never reached the family's dispatch
    /// function. Driver-level failures are reported in `outvec` instead.
    fn call(
        &self,
        msg_type: F::MsgType,
        invec: InVec<'_, Message<'_, F>>,
        outvec: OutVec<'_>,
    ) -> Result<(), ChannelError>;
}

impl<F: Family, C: SecureChannel<F>> SecureChannel<F> for Arc<C> {
    fn init(&self) {
        (**self).init();
    }

    fn call(
        &self,
        msg_type: F::MsgType,
        invec: InVec<'_, Message<'_, F>>,
        outvec: OutVec<'_>,
    ) -> Result<(), ChannelError> {
        (**self).call(msg_type, invec, outvec)
    }
}
