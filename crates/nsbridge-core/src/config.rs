//! Configuration and open parameters.

use std::{fmt, sync::Arc};

use nsbridge_proto::ReturnMode;

use crate::{family::Family, relay::Notification, sync::Timeout};

/// Default capacity of a family's handle table.
pub const DEFAULT_MAX_HANDLES: usize = 8;

/// Per-driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Capacity of the handle table; at most 256 since slot indices are bytes
    pub max_handles: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { max_handles: DEFAULT_MAX_HANDLES }
    }
}

/// Application callback invoked when a callback-mode operation completes.
pub type CallbackFxn<F> = Arc<dyn Fn(Notification<F>) + Send + Sync>;

/// How a handle reports operation completion.
///
/// A callback-mode handle always carries its callback.
pub enum ReturnBehavior<F: Family> {
    /// Dispatch returns once the operation is done; no scheduler suspension
    Polling,
    /// Dispatch pends until the relay posts the completion
    Blocking,
    /// Dispatch returns [`crate::Completion::Pending`]; the callback runs on
    /// completion
    Callback(CallbackFxn<F>),
    /// Operations are dispatched through `dispatch_async` and awaited
    Async,
}

impl<F: Family> ReturnBehavior<F> {
    /// Callback behavior from a closure.
    pub fn callback(f: impl Fn(Notification<F>) + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    /// Wire return mode reported to the secure side.
    pub fn mode(&self) -> ReturnMode {
        match self {
            Self::Polling => ReturnMode::Polling,
            Self::Blocking => ReturnMode::Blocking,
            Self::Callback(_) | Self::Async => ReturnMode::Callback,
        }
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Blocking => "blocking",
            Self::Callback(_) => "callback",
            Self::Async => "async",
        }
    }
}

impl<F: Family> Clone for ReturnBehavior<F> {
    fn clone(&self) -> Self {
        match self {
            Self::Polling => Self::Polling,
            Self::Blocking => Self::Blocking,
            Self::Callback(f) => Self::Callback(Arc::clone(f)),
            Self::Async => Self::Async,
        }
    }
}

impl<F: Family> fmt::Debug for ReturnBehavior<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Open parameters.
pub struct Params<F: Family> {
    /// Completion model of the handle
    pub return_behavior: ReturnBehavior<F>,
    /// Lock and completion timeout; only honored for blocking handles
    pub timeout: Timeout,
    /// Family-specific parameters forwarded to the secure side
    pub custom: F::Params,
}

impl<F: Family> Default for Params<F> {
    fn default() -> Self {
        Self {
            return_behavior: ReturnBehavior::Blocking,
            timeout: Timeout::Forever,
            custom: F::Params::default(),
        }
    }
}

impl<F: Family> Clone for Params<F> {
    fn clone(&self) -> Self {
        Self {
            return_behavior: self.return_behavior.clone(),
            timeout: self.timeout,
            custom: self.custom.clone(),
        }
    }
}

impl<F: Family> fmt::Debug for Params<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("return_behavior", &self.return_behavior)
            .field("timeout", &self.timeout)
            .field("custom", &self.custom)
            .finish()
    }
}

impl<F: Family> Params<F> {
    /// Default parameters with the given return behavior.
    pub fn new(return_behavior: ReturnBehavior<F>) -> Self {
        Self { return_behavior, ..Self::default() }
    }

    /// Polling parameters.
    pub fn polling() -> Self {
        Self::new(ReturnBehavior::Polling)
    }

    /// Blocking parameters, waiting forever.
    pub fn blocking() -> Self {
        Self::new(ReturnBehavior::Blocking)
    }

    /// Callback parameters.
    pub fn callback(f: impl Fn(Notification<F>) + Send + Sync + 'static) -> Self {
        Self::new(ReturnBehavior::callback(f))
    }

    /// Parameters for the future-based path.
    pub fn asynchronous() -> Self {
        Self::new(ReturnBehavior::Async)
    }

    /// Replace the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the family-specific parameters.
    #[must_use]
    pub fn with_custom(mut self, custom: F::Params) -> Self {
        self.custom = custom;
        self
    }

    /// Timeout the handle actually uses: the configured one for blocking
    /// handles, no wait otherwise.
    pub fn effective_timeout(&self) -> Timeout {
        match self.return_behavior {
            ReturnBehavior::Blocking => self.timeout,
            _ => Timeout::NoWait,
        }
    }
}

/// Caller-supplied hardware configuration for `construct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwConfig {
    /// Interrupt priority of the accelerator on the secure side
    pub interrupt_priority: u8,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self { interrupt_priority: u8::MAX }
    }
}
