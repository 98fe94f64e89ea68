//! # Bundle and framework event publishing.
//!
//! [`EventPublisher`] keeps one listener table per `(kind, context)` pair:
//! asynchronous bundle listeners, synchronous bundle listeners and framework
//! listeners. Publishing freezes the relevant tables under the lock, releases it,
//! and hands the snapshots to a fresh [`ListenerQueue`](crate::ListenerQueue).
//!
//! ## Delivery rules
//! - Bundle events go to synchronous listeners first (calling thread), then to
//!   asynchronous listeners (worker thread).
//! - `Starting`, `Stopping` and `LazyActivation` are never delivered asynchronously.
//! - Framework events are always asynchronous; `Error` events are also logged.
//! - Once the event manager is closed, publishing is a logged no-op.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bundle::Bundle;
use crate::core::ContextId;
use crate::error::EventError;
use crate::events::{
    BundleEvent, BundleEventKind, BundleSignal, Event, EventDispatcher, EventManager,
    FrameworkEvent, FrameworkEventKind, ListenerSnapshot,
};
use crate::listeners::{Listener, ListenerHandle, ListenerTable};

/// Which table a listener lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ListenerKind {
    Bundle,
    SynchronousBundle,
    Framework,
}

struct ContextListeners {
    dispatcher: Arc<dyn EventDispatcher>,
    table: ListenerTable,
}

/// Per-context bundle and framework listener tables plus publishing.
pub struct EventPublisher {
    manager: Arc<EventManager>,
    tables: Mutex<HashMap<ListenerKind, HashMap<ContextId, ContextListeners>>>,
}

impl EventPublisher {
    pub fn new(manager: Arc<EventManager>) -> Self {
        Self {
            manager,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add_listener(
        &self,
        kind: ListenerKind,
        context: ContextId,
        dispatcher: &Arc<dyn EventDispatcher>,
        listener: Listener,
    ) -> ListenerHandle {
        let mut tables = self.tables.lock();
        let entry = tables
            .entry(kind)
            .or_default()
            .entry(context)
            .or_insert_with(|| ContextListeners {
                dispatcher: Arc::clone(dispatcher),
                table: ListenerTable::new(),
            });
        let (handle, _) = entry.table.insert(listener);
        tracing::trace!(context, ?kind, listener = handle.as_u64(), "listener added");
        handle
    }

    pub(crate) fn remove_listener(
        &self,
        kind: ListenerKind,
        context: ContextId,
        handle: ListenerHandle,
    ) -> Result<(), EventError> {
        let mut tables = self.tables.lock();
        let removed = tables
            .get_mut(&kind)
            .and_then(|by_ctx| by_ctx.get_mut(&context))
            .and_then(|entry| entry.table.remove(handle));
        match removed {
            Some(_) => Ok(()),
            None => Err(EventError::UnknownHandle),
        }
    }

    /// Returns `true` if `handle` lives in the `kind` table of `context`.
    pub(crate) fn contains(&self, kind: ListenerKind, context: ContextId, handle: ListenerHandle) -> bool {
        self.tables
            .lock()
            .get(&kind)
            .and_then(|by_ctx| by_ctx.get(&context))
            .is_some_and(|entry| entry.table.contains(handle))
    }

    /// Drops every table owned by `context`.
    pub(crate) fn remove_context(&self, context: ContextId) {
        let mut tables = self.tables.lock();
        let mut dropped = 0;
        for by_ctx in tables.values_mut() {
            if let Some(entry) = by_ctx.remove(&context) {
                dropped += entry.table.len();
            }
        }
        tracing::trace!(context, dropped, "context listeners dropped");
    }

    /// Number of listeners of `kind` added by `context`.
    #[cfg(test)]
    pub(crate) fn listener_count(&self, kind: ListenerKind, context: ContextId) -> usize {
        self.tables
            .lock()
            .get(&kind)
            .and_then(|by_ctx| by_ctx.get(&context))
            .map_or(0, |entry| entry.table.len())
    }

    /// Publishes a bundle lifecycle event.
    pub fn publish_bundle_event(&self, kind: BundleEventKind, bundle: &Bundle) {
        let (sync, asynchronous) = {
            let tables = self.tables.lock();
            let sync = snapshots(&tables, ListenerKind::SynchronousBundle);
            let asynchronous = if kind.is_synchronous_only() {
                Vec::new()
            } else {
                snapshots(&tables, ListenerKind::Bundle)
            };
            (sync, asynchronous)
        };
        tracing::trace!(bundle = %bundle, ?kind, "publishing bundle event");
        let event: Event = BundleEvent::new(kind, bundle.clone()).into();
        self.deliver(sync, asynchronous, event);
    }

    /// Tells bundle listeners that a batch of bundle changes begins.
    pub fn publish_bundle_batch_begin(&self) {
        self.publish_bundle_batch(BundleSignal::BatchBegin);
    }

    /// Tells bundle listeners that the current batch of bundle changes ended.
    pub fn publish_bundle_batch_end(&self) {
        self.publish_bundle_batch(BundleSignal::BatchEnd);
    }

    fn publish_bundle_batch(&self, signal: BundleSignal) {
        let (sync, asynchronous) = {
            let tables = self.tables.lock();
            (
                snapshots(&tables, ListenerKind::SynchronousBundle),
                snapshots(&tables, ListenerKind::Bundle),
            )
        };
        self.deliver(sync, asynchronous, Event::Bundle(signal));
    }

    /// Publishes a framework event asynchronously.
    pub fn publish_framework_event(&self, event: FrameworkEvent) {
        match event.kind {
            FrameworkEventKind::Error => tracing::error!(
                bundle = ?event.bundle.as_ref().map(Bundle::to_string),
                "framework error: {}",
                event.error.as_deref().unwrap_or("unknown")
            ),
            FrameworkEventKind::Warning => tracing::warn!(
                bundle = ?event.bundle.as_ref().map(Bundle::to_string),
                "framework warning: {}",
                event.error.as_deref().unwrap_or("unknown")
            ),
            kind => tracing::debug!(?kind, "framework event"),
        }
        let asynchronous = snapshots(&self.tables.lock(), ListenerKind::Framework);
        self.deliver(Vec::new(), asynchronous, event.into());
    }

    fn deliver(&self, sync: Vec<ListenerSnapshot>, asynchronous: Vec<ListenerSnapshot>, event: Event) {
        if sync.is_empty() && asynchronous.is_empty() {
            return;
        }
        if let Err(err) = self.try_deliver(sync, asynchronous, event) {
            tracing::debug!(label = err.as_label(), "event not delivered: {err}");
        }
    }

    fn try_deliver(
        &self,
        sync: Vec<ListenerSnapshot>,
        asynchronous: Vec<ListenerSnapshot>,
        event: Event,
    ) -> Result<(), EventError> {
        if !sync.is_empty() {
            let mut queue = self.manager.new_queue()?;
            for snapshot in sync {
                queue.queue_snapshot(snapshot)?;
            }
            queue.dispatch_sync(&event);
        }
        if !asynchronous.is_empty() {
            let mut queue = self.manager.new_queue()?;
            for snapshot in asynchronous {
                queue.queue_snapshot(snapshot)?;
            }
            queue.dispatch_async(event)?;
        }
        Ok(())
    }
}

fn snapshots(
    tables: &HashMap<ListenerKind, HashMap<ContextId, ContextListeners>>,
    kind: ListenerKind,
) -> Vec<ListenerSnapshot> {
    tables
        .get(&kind)
        .map(|by_ctx| {
            by_ctx
                .values()
                .filter(|entry| !entry.table.is_empty())
                .map(|entry| {
                    ListenerSnapshot::from_map(entry.table.snapshot(), Arc::clone(&entry.dispatcher))
                })
                .collect()
        })
        .unwrap_or_default()
}
