use crate::error::ListenerError;
use crate::events::Event;
use crate::listeners::{Listener, ListenerHandle};

/// Delivers one event to one listener on behalf of the listener's owner.
///
/// A [`ListenerQueue`](crate::ListenerQueue) pairs every snapshot with the
/// dispatcher of the context that added those listeners. The dispatcher decides
/// whether the owner may still receive events and what happens when the listener
/// fails; the queue only logs a returned error and continues with the next
/// listener.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use bundlevisor::{Event, EventDispatcher, Listener, ListenerError, ListenerHandle};
///
/// #[derive(Default)]
/// struct Counting(AtomicUsize);
///
/// impl EventDispatcher for Counting {
///     fn dispatch(&self, _h: ListenerHandle, l: &Listener, ev: &Event) -> Result<(), ListenerError> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         l.invoke(ev)
///     }
/// }
/// ```
pub trait EventDispatcher: Send + Sync + 'static {
    fn dispatch(
        &self,
        handle: ListenerHandle,
        listener: &Listener,
        event: &Event,
    ) -> Result<(), ListenerError>;
}
