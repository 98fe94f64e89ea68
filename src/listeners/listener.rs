//! Listener traits, handles and the [`Listener`] union stored in tables.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ListenerError, panic_message};
use crate::events::{BundleEvent, BundleSignal, Event, FrameworkEvent, ServiceEvent};
use crate::listeners::FilteredServiceListener;

static LISTENER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Observes bundle lifecycle changes.
///
/// Added with `add_bundle_listener` the listener is called on the event worker
/// thread; added with `add_synchronous_bundle_listener` it is called on the
/// publishing thread and additionally sees `Starting`, `Stopping` and
/// `LazyActivation`.
pub trait BundleListener: Send + Sync + 'static {
    fn bundle_changed(&self, event: &BundleEvent) -> Result<(), ListenerError>;

    /// A batch of bundle changes begins.
    fn batch_begin(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// The current batch ended.
    fn batch_end(&self) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Observes service registrations. Always called synchronously.
pub trait ServiceListener: Send + Sync + 'static {
    fn service_changed(&self, event: &ServiceEvent) -> Result<(), ListenerError>;
}

/// Observes runtime-wide notifications. Always called on the event worker thread.
pub trait FrameworkListener: Send + Sync + 'static {
    fn framework_event(&self, event: &FrameworkEvent) -> Result<(), ListenerError>;
}

/// Identifies an added listener; returned by every `add_*_listener` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub(crate) fn next() -> Self {
        Self(LISTENER_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A listener of any family, as stored in listener tables and snapshots.
#[derive(Clone)]
pub enum Listener {
    Bundle(Arc<dyn BundleListener>),
    Service(FilteredServiceListener),
    Framework(Arc<dyn FrameworkListener>),
}

impl Listener {
    /// Calls the listener method matching `event`; mismatched families are ignored.
    ///
    /// Panics are caught and reported as [`ListenerError::Panicked`].
    pub fn invoke(&self, event: &Event) -> Result<(), ListenerError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| match (self, event) {
            (Listener::Bundle(l), Event::Bundle(BundleSignal::Changed(ev))) => l.bundle_changed(ev),
            (Listener::Bundle(l), Event::Bundle(BundleSignal::BatchBegin)) => l.batch_begin(),
            (Listener::Bundle(l), Event::Bundle(BundleSignal::BatchEnd)) => l.batch_end(),
            (Listener::Service(l), Event::Service(ev)) => l.deliver(ev),
            (Listener::Framework(l), Event::Framework(ev)) => l.framework_event(ev),
            _ => Ok(()),
        }));
        outcome.unwrap_or_else(|payload| Err(ListenerError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Returns `true` if both wrap the same listener object.
    pub fn same_as(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::Bundle(a), Listener::Bundle(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Listener::Service(a), Listener::Service(b)) => a.same_listener(b.listener()),
            (Listener::Framework(a), Listener::Framework(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Listener::Bundle(_) => "bundle_listener",
            Listener::Service(_) => "service_listener",
            Listener::Framework(_) => "framework_listener",
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}
