//! Error types used by the bundle runtime, its registry and its event machinery.
//!
//! This module defines the following enums:
//!
//! - [`FrameworkError`] - misuse surfaced synchronously to the caller (closed
//!   contexts, bad arguments, bad filters, unregistered services, activator failures).
//! - [`EventError`] - failures of the event manager, its worker and listener queues.
//! - [`ListenerError`] - failures raised by listener callbacks. These never reach the
//!   publisher: they are logged and converted into framework `Error` events.
//! - [`FilterError`] - a malformed filter string, with the failing position.
//!
//! All of them provide `as_label` for logs.

use std::fmt;

use thiserror::Error;

/// Boxed error returned by activators, listeners and factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle phase of a bundle activator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivatorPhase {
    Start,
    Stop,
}

impl fmt::Display for ActivatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivatorPhase::Start => f.write_str("start"),
            ActivatorPhase::Stop => f.write_str("stop"),
        }
    }
}

/// # Errors surfaced by bundle contexts and the service registry.
///
/// Every variant is returned to the immediate caller. None of them is retried
/// or logged-and-dropped by the runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// The bundle context was closed; it can never be used again.
    #[error("bundle context of {bundle} is no longer valid")]
    InvalidContext {
        /// Symbolic name of the bundle owning the context.
        bundle: String,
    },

    /// A caller supplied an empty interface list, a service object that does not
    /// provide a declared interface, or a similar bad argument.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The filter string could not be parsed.
    #[error(transparent)]
    InvalidFilterSyntax(#[from] FilterError),

    /// The operation is not allowed in the current state (e.g. the registration
    /// was already unregistered).
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// A bundle activator failed while starting or stopping.
    #[error("activator of bundle {bundle} failed during {phase}: {source}")]
    BundleActivator {
        /// Symbolic name of the failing bundle.
        bundle: String,
        /// Phase in which the activator failed.
        phase: ActivatorPhase,
        /// The activator's own error.
        #[source]
        source: BoxError,
    },

    /// The event machinery refused the request.
    #[error(transparent)]
    Event(#[from] EventError),
}

impl FrameworkError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use bundlevisor::FrameworkError;
    ///
    /// let err = FrameworkError::InvalidArgument { reason: "no interfaces".into() };
    /// assert_eq!(err.as_label(), "invalid_argument");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FrameworkError::InvalidContext { .. } => "invalid_context",
            FrameworkError::InvalidArgument { .. } => "invalid_argument",
            FrameworkError::InvalidFilterSyntax(_) => "invalid_filter_syntax",
            FrameworkError::InvalidState { .. } => "invalid_state",
            FrameworkError::BundleActivator { .. } => "bundle_activator",
            FrameworkError::Event(e) => e.as_label(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        FrameworkError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        FrameworkError::InvalidState {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by the event manager, its worker and listener queues.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event manager was closed; no new queues can be created.
    #[error("event manager is closed")]
    Closed,

    /// The worker thread has stopped and accepts no further deliveries.
    #[error("event worker is not running")]
    NotRunning,

    /// A dispatch already started on this listener queue.
    #[error("listener queue is read-only after dispatch")]
    ReadOnly,

    /// A listener handle is not known to the table it was looked up in.
    #[error("unknown listener handle")]
    UnknownHandle,

    /// The worker thread or its runtime could not be created.
    #[error("failed to start event worker: {0}")]
    Spawn(String),
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::Closed => "event_manager_closed",
            EventError::NotRunning => "event_worker_not_running",
            EventError::ReadOnly => "listener_queue_read_only",
            EventError::UnknownHandle => "unknown_listener_handle",
            EventError::Spawn(_) => "event_worker_spawn",
        }
    }
}

/// # Failure of a single listener invocation.
///
/// Returned by listener callbacks and by [`EventDispatcher`](crate::EventDispatcher)
/// implementations. The queue that iterates listeners logs it and moves on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener returned an error.
    #[error("listener failed: {0}")]
    Failed(String),

    /// The listener panicked; the payload message is preserved.
    #[error("listener panicked: {0}")]
    Panicked(String),
}

impl ListenerError {
    /// Convenience constructor for listener implementations.
    pub fn failed(msg: impl Into<String>) -> Self {
        ListenerError::Failed(msg.into())
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ListenerError::Failed(_) => "listener_failed",
            ListenerError::Panicked(_) => "listener_panicked",
        }
    }
}

/// # A malformed filter string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter {filter:?} at position {position}: {message}")]
pub struct FilterError {
    /// The full filter text.
    pub filter: String,
    /// Byte offset where parsing failed.
    pub position: usize,
    /// What the parser expected.
    pub message: String,
}

/// Extracts a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
