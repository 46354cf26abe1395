//! Messages carried in the input vector.
//!
//! Every message is built on the dispatching thread's stack, lives for one
//! secure call, and is never retained by either side afterwards. The relay
//! registered by [`CallbackMsg`] is the only thing the secure side keeps, and
//! it is reference counted rather than borrowed.

use std::{fmt, mem, sync::Arc};

use nsbridge_proto::{HandleId, ReturnMode};

use crate::{config::HwConfig, family::Family, relay::SecureCallback, sync::Timeout};

/// Open parameters as the secure side sees them.
pub struct WireParams<'a, F: Family> {
    /// Return mode the secure driver is opened with
    pub return_mode: ReturnMode,
    /// Timeout the secure driver may use for its own waits
    pub timeout: Timeout,
    /// Family-specific parameters
    pub custom: &'a F::Params,
}

/// `OPEN` request: open a statically configured instance.
pub struct OpenMsg<'a, F: Family> {
    /// Instance index
    pub index: u8,
    /// Open parameters
    pub params: WireParams<'a, F>,
}

/// `CONSTRUCT` request: open an instance from caller-supplied configuration.
pub struct ConstructMsg<'a, F: Family> {
    /// Hardware configuration
    pub config: &'a HwConfig,
    /// Open parameters
    pub params: WireParams<'a, F>,
}

/// `CLOSE` request.
pub struct CloseMsg {
    /// Handle to close
    pub handle: HandleId,
}

/// `REGISTER_CALLBACK` request: hand the secure side a relay for `handle`.
pub struct CallbackMsg<F: Family> {
    /// Handle the relay belongs to
    pub handle: HandleId,
    /// Relay the secure side posts completions to
    pub callback: Arc<dyn SecureCallback<F>>,
}

/// One-step operation request (encrypt, decrypt, hash, key generation).
pub struct OneStepOperationMsg<'a, F: Family> {
    /// Target handle
    pub handle: HandleId,
    /// Operation struct, updated in place by the secure side
    pub operation: &'a mut F::Operation,
}

/// Setup request for a segmented operation.
pub struct SetupOperationMsg<'a, F: Family> {
    /// Target handle
    pub handle: HandleId,
    /// Setup parameters
    pub operation: &'a mut F::Operation,
}

/// Add-data request for a segmented operation.
pub struct AddDataMsg<'a, F: Family> {
    /// Target handle
    pub handle: HandleId,
    /// Segment to process
    pub operation: &'a mut F::Operation,
}

/// Finalize request for a segmented operation.
pub struct FinalizeMsg<'a, F: Family> {
    /// Target handle
    pub handle: HandleId,
    /// Final segment
    pub operation: &'a mut F::Operation,
}

/// Control request: update secure-side state without starting the hardware.
///
/// Completes synchronously; never posted to the relay.
pub struct ControlMsg<'a, F: Family> {
    /// Target handle
    pub handle: HandleId,
    /// New state
    pub operation: &'a mut F::Operation,
}

/// `CANCEL_OPERATION` request.
pub struct CancelOperationMsg {
    /// Handle whose in-flight operation is canceled
    pub handle: HandleId,
}

/// Reset request: discard segmented-operation state.
pub struct ResetMsg {
    /// Target handle
    pub handle: HandleId,
}

/// Any message a family dispatch function accepts.
pub enum Message<'a, F: Family> {
    /// See [`OpenMsg`]
    Open(OpenMsg<'a, F>),
    /// See [`ConstructMsg`]
    Construct(ConstructMsg<'a, F>),
    /// See [`CloseMsg`]
    Close(CloseMsg),
    /// See [`CallbackMsg`]
    RegisterCallback(CallbackMsg<F>),
    /// See [`OneStepOperationMsg`]
    OneStep(OneStepOperationMsg<'a, F>),
    /// See [`SetupOperationMsg`]
    Setup(SetupOperationMsg<'a, F>),
    /// See [`AddDataMsg`]
    AddData(AddDataMsg<'a, F>),
    /// See [`FinalizeMsg`]
    Finalize(FinalizeMsg<'a, F>),
    /// See [`ControlMsg`]
    Control(ControlMsg<'a, F>),
    /// See [`CancelOperationMsg`]
    Cancel(CancelOperationMsg),
    /// See [`ResetMsg`]
    Reset(ResetMsg),
}

/// Shape of an operation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// [`OneStepOperationMsg`]
    OneStep,
    /// [`SetupOperationMsg`]
    Setup,
    /// [`AddDataMsg`]
    AddData,
    /// [`FinalizeMsg`]
    Finalize,
    /// [`ControlMsg`]
    Control,
}

impl OperationKind {
    /// True for kinds the secure side completes inside the call.
    pub fn is_synchronous(self) -> bool {
        self == Self::Control
    }
}

impl<'a, F: Family> Message<'a, F> {
    /// Operation message of the given kind.
    pub fn operation(
        kind: OperationKind,
        handle: HandleId,
        operation: &'a mut F::Operation,
    ) -> Self {
        match kind {
            OperationKind::OneStep => Self::OneStep(OneStepOperationMsg { handle, operation }),
            OperationKind::Setup => Self::Setup(SetupOperationMsg { handle, operation }),
            OperationKind::AddData => Self::AddData(AddDataMsg { handle, operation }),
            OperationKind::Finalize => Self::Finalize(FinalizeMsg { handle, operation }),
            OperationKind::Control => Self::Control(ControlMsg { handle, operation }),
        }
    }

    /// Size of the concrete message struct, the input vector's length.
    pub fn len(&self) -> usize {
        match self {
            Self::Open(msg) => mem::size_of_val(msg),
            Self::Construct(msg) => mem::size_of_val(msg),
            Self::Close(msg) => mem::size_of_val(msg),
            Self::RegisterCallback(msg) => mem::size_of_val(msg),
            Self::OneStep(msg) => mem::size_of_val(msg),
            Self::Setup(msg) => mem::size_of_val(msg),
            Self::AddData(msg) => mem::size_of_val(msg),
            Self::Finalize(msg) => mem::size_of_val(msg),
            Self::Control(msg) => mem::size_of_val(msg),
            Self::Cancel(msg) => mem::size_of_val(msg),
            Self::Reset(msg) => mem::size_of_val(msg),
        }
    }

    /// Always false; every message struct has a non-zero size.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target handle, `None` for open and construct.
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Self::Open(_) | Self::Construct(_) => None,
            Self::Close(CloseMsg { handle })
            | Self::RegisterCallback(CallbackMsg { handle, .. })
            | Self::OneStep(OneStepOperationMsg { handle, .. })
            | Self::Setup(SetupOperationMsg { handle, .. })
            | Self::AddData(AddDataMsg { handle, .. })
            | Self::Finalize(FinalizeMsg { handle, .. })
            | Self::Control(ControlMsg { handle, .. })
            | Self::Cancel(CancelOperationMsg { handle })
            | Self::Reset(ResetMsg { handle }) => Some(*handle),
        }
    }

    /// Kind of an operation message, `None` for lifecycle messages.
    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            Self::OneStep(_) => Some(OperationKind::OneStep),
            Self::Setup(_) => Some(OperationKind::Setup),
            Self::AddData(_) => Some(OperationKind::AddData),
            Self::Finalize(_) => Some(OperationKind::Finalize),
            Self::Control(_) => Some(OperationKind::Control),
            _ => None,
        }
    }

    /// Operation struct carried by operation messages.
    pub fn operation_mut(&mut self) -> Option<&mut F::Operation> {
        match self {
            Self::OneStep(OneStepOperationMsg { operation, .. })
            | Self::Setup(SetupOperationMsg { operation, .. })
            | Self::AddData(AddDataMsg { operation, .. })
            | Self::Finalize(FinalizeMsg { operation, .. })
            | Self::Control(ControlMsg { operation, .. }) => Some(&mut **operation),
            _ => None,
        }
    }

    /// Variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Construct(_) => "construct",
            Self::Close(_) => "close",
            Self::RegisterCallback(_) => "register_callback",
            Self::OneStep(_) => "one_step",
            Self::Setup(_) => "setup",
            Self::AddData(_) => "add_data",
            Self::Finalize(_) => "finalize",
            Self::Control(_) => "control",
            Self::Cancel(_) => "cancel",
            Self::Reset(_) => "reset",
        }
    }
}

impl<F: Family> fmt::Debug for Message<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.name())
            .field("handle", &self.handle())
            .field("len", &self.len())
            .finish()
    }
}
