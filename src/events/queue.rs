//! # Listener queues and snapshots.
//!
//! A [`ListenerQueue`] collects one [`ListenerSnapshot`] per listener owner and
//! then performs a single dispatch, either on the calling thread or through the
//! event worker. Once a dispatch started the queue is read-only.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{EventError, panic_message};
use crate::events::{Event, EventDispatcher, EventManager};
use crate::listeners::{Listener, ListenerHandle, ListenerMap};

/// Frozen set of listeners plus the dispatcher that delivers to them.
#[derive(Clone)]
pub struct ListenerSnapshot {
    listeners: ListenerMap,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl ListenerSnapshot {
    pub fn new<I>(listeners: I, dispatcher: Arc<dyn EventDispatcher>) -> Self
    where
        I: IntoIterator<Item = (ListenerHandle, Listener)>,
    {
        Self {
            listeners: Arc::new(listeners.into_iter().collect()),
            dispatcher,
        }
    }

    pub(crate) fn from_map(listeners: ListenerMap, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            listeners,
            dispatcher,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Hands `event` to every listener through the dispatcher.
    ///
    /// Errors and panics are logged per listener; delivery always continues.
    pub(crate) fn deliver(&self, event: &Event) {
        for (handle, listener) in self.listeners.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.dispatcher.dispatch(*handle, listener, event)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::debug!(
                    listener = handle.as_u64(),
                    event = event.as_label(),
                    label = err.as_label(),
                    "listener delivery failed: {err}"
                ),
                Err(payload) => tracing::error!(
                    listener = handle.as_u64(),
                    event = event.as_label(),
                    "event dispatcher panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
    }
}

/// Builder for one dispatch over several listener snapshots.
///
/// Obtained from [`EventManager::new_queue`].
pub struct ListenerQueue {
    manager: Arc<EventManager>,
    snapshots: Vec<ListenerSnapshot>,
    read_only: bool,
}

impl ListenerQueue {
    pub(crate) fn new(manager: Arc<EventManager>) -> Self {
        Self {
            manager,
            snapshots: Vec::new(),
            read_only: false,
        }
    }

    /// Appends a snapshot of `listeners` to be delivered through `dispatcher`.
    ///
    /// Fails with [`EventError::ReadOnly`] once a dispatch has begun.
    pub fn queue_listeners<I>(
        &mut self,
        listeners: I,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<(), EventError>
    where
        I: IntoIterator<Item = (ListenerHandle, Listener)>,
    {
        self.queue_snapshot(ListenerSnapshot::new(listeners, dispatcher))
    }

    pub(crate) fn queue_snapshot(&mut self, snapshot: ListenerSnapshot) -> Result<(), EventError> {
        if self.read_only {
            return Err(EventError::ReadOnly);
        }
        if !snapshot.is_empty() {
            self.snapshots.push(snapshot);
        }
        Ok(())
    }

    /// Posts one delivery per snapshot to the worker, starting it if needed.
    ///
    /// The worker is not started when there is nothing to deliver.
    pub fn dispatch_async(&mut self, event: Event) -> Result<(), EventError> {
        self.read_only = true;
        if self.snapshots.is_empty() {
            return Ok(());
        }
        let worker = self.manager.worker()?;
        for snapshot in &self.snapshots {
            worker.post(snapshot.clone(), event.clone())?;
        }
        Ok(())
    }

    /// Delivers to every snapshot on the calling thread, in queue order.
    pub fn dispatch_sync(&mut self, event: &Event) {
        self.read_only = true;
        for snapshot in &self.snapshots {
            snapshot.deliver(event);
        }
    }

    /// Number of queued (non-empty) snapshots.
    #[inline]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::error::ListenerError;
    use crate::events::{BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind};
    use crate::listeners::{BundleListener, FrameworkListener};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Direct;

    impl EventDispatcher for Direct {
        fn dispatch(
            &self,
            _handle: ListenerHandle,
            listener: &Listener,
            event: &Event,
        ) -> Result<(), ListenerError> {
            listener.invoke(event)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<BundleEventKind>>);

    impl BundleListener for Recorder {
        fn bundle_changed(&self, event: &BundleEvent) -> Result<(), ListenerError> {
            self.0.lock().push(event.kind);
            Ok(())
        }
    }

    struct Failing;

    impl BundleListener for Failing {
        fn bundle_changed(&self, _event: &BundleEvent) -> Result<(), ListenerError> {
            panic!("first listener panics");
        }
    }

    struct Forward(Mutex<mpsc::Sender<FrameworkEventKind>>);

    impl FrameworkListener for Forward {
        fn framework_event(&self, event: &FrameworkEvent) -> Result<(), ListenerError> {
            let _ = self.0.lock().send(event.kind);
            Ok(())
        }
    }

    fn started() -> Event {
        BundleEvent::new(BundleEventKind::Started, Bundle::new(1, "a", "a")).into()
    }

    #[test]
    fn sync_dispatch_survives_failing_listeners() {
        let manager = EventManager::new("test-events");
        let recorder = Arc::new(Recorder::default());
        let mut queue = manager.new_queue().unwrap();
        queue
            .queue_listeners(
                [
                    (ListenerHandle::next(), Listener::Bundle(Arc::new(Failing))),
                    (ListenerHandle::next(), Listener::Bundle(recorder.clone())),
                ],
                Arc::new(Direct),
            )
            .unwrap();

        queue.dispatch_sync(&started());
        assert_eq!(*recorder.0.lock(), vec![BundleEventKind::Started]);
    }

    #[test]
    fn queue_is_read_only_after_dispatch() {
        let manager = EventManager::new("test-events");
        let mut queue = manager.new_queue().unwrap();
        queue.dispatch_sync(&started());
        let err = queue
            .queue_listeners(std::iter::empty(), Arc::new(Direct))
            .unwrap_err();
        assert_eq!(err, EventError::ReadOnly);
    }

    #[test]
    fn async_dispatch_runs_on_the_worker() {
        let manager = EventManager::new("test-events");
        let (tx, rx) = mpsc::channel();
        let mut queue = manager.new_queue().unwrap();
        queue
            .queue_listeners(
                [(
                    ListenerHandle::next(),
                    Listener::Framework(Arc::new(Forward(Mutex::new(tx)))),
                )],
                Arc::new(Direct),
            )
            .unwrap();
        queue
            .dispatch_async(FrameworkEvent::new(FrameworkEventKind::Info).into())
            .unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, FrameworkEventKind::Info);
        manager.close();
    }

    #[test]
    fn empty_async_dispatch_does_not_start_the_worker() {
        let manager = EventManager::new("test-events");
        let mut queue = manager.new_queue().unwrap();
        queue.dispatch_async(started()).unwrap();
        assert!(!manager.has_worker());
    }
}
