//! # Service registry.
//!
//! [`ServiceRegistry`] is the shared table of published services plus the
//! per-context service listener tables.
//!
//! ## Tables
//! ```text
//! by_context:   ContextId ──► [ServiceRegistration]   (what a context published)
//! by_interface: interface ──► [ServiceRegistration]   (lookup by name)
//! all:          [ServiceRegistration]                 (lookup without a name)
//! listeners:    ContextId ──► (dispatcher, ListenerTable of FilteredServiceListener)
//! ```
//!
//! ## Rules
//! - One lock guards every table; it is never held while a listener, factory or
//!   host hook runs.
//! - Service events are delivered synchronously to a snapshot of every context's
//!   service listeners taken before delivery starts.
//! - Lookups return references ordered by ranking (highest first), then id.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::bundle::BundleHost;
use crate::config::Config;
use crate::core::{BundleContext, ContextId};
use crate::error::{EventError, FrameworkError};
use crate::events::{Event, EventDispatcher, EventManager, ListenerSnapshot, ServiceEvent, ServiceEventKind};
use crate::filter::Filter;
use crate::listeners::{FilteredServiceListener, Listener, ListenerHandle, ListenerTable, ServiceListener};
use crate::services::{
    Properties, ServiceReference, ServiceRegistration, ServiceSource, ServiceState, sort_references,
};

struct ContextListeners {
    dispatcher: Arc<dyn EventDispatcher>,
    table: ListenerTable,
}

struct Tables {
    by_context: HashMap<ContextId, Vec<ServiceRegistration>>,
    by_interface: HashMap<String, Vec<ServiceRegistration>>,
    all: Vec<ServiceRegistration>,
    listeners: HashMap<ContextId, ContextListeners>,
}

/// Shared table of published services.
pub struct ServiceRegistry {
    host: Arc<dyn BundleHost>,
    events: Arc<EventManager>,
    sub_capacity: usize,
    next_id: AtomicU64,
    tables: Mutex<Tables>,
}

impl ServiceRegistry {
    pub fn new(config: &Config, host: Arc<dyn BundleHost>, events: Arc<EventManager>) -> Arc<Self> {
        Arc::new(Self {
            host,
            events,
            sub_capacity: config.initial_sub_capacity,
            next_id: AtomicU64::new(1),
            tables: Mutex::new(Tables {
                by_context: HashMap::with_capacity(config.initial_capacity),
                by_interface: HashMap::with_capacity(config.initial_capacity),
                all: Vec::with_capacity(config.initial_capacity),
                listeners: HashMap::with_capacity(config.initial_capacity),
            }),
        })
    }

    #[inline]
    pub(crate) fn host(&self) -> &Arc<dyn BundleHost> {
        &self.host
    }

    /// Publishes `source` under `interfaces` on behalf of `context`.
    ///
    /// Interface names are de-duplicated and sorted. Fails with
    /// [`FrameworkError::InvalidArgument`] when no (non-empty) interface name is
    /// given, or when a plain service object does not provide one of them.
    /// `Registered` is published synchronously before this returns.
    pub fn register_service<I, S>(
        self: &Arc<Self>,
        context: &BundleContext,
        interfaces: I,
        source: impl Into<ServiceSource>,
        properties: Properties,
    ) -> Result<ServiceRegistration, FrameworkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bundle = context.bundle()?;
        let source = source.into();
        let interfaces: Vec<String> = interfaces
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if interfaces.is_empty() || interfaces.iter().any(String::is_empty) {
            return Err(FrameworkError::invalid_argument(
                "a service needs at least one non-empty interface name",
            ));
        }
        if let ServiceSource::Object(object) = &source {
            if let Some(missing) = object.first_missing(&interfaces) {
                return Err(FrameworkError::invalid_argument(format!(
                    "service object does not provide {missing}"
                )));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = ServiceRegistration::new(
            id,
            interfaces,
            source,
            context.id(),
            bundle.clone(),
            Arc::downgrade(self),
            properties,
        );
        {
            let mut tables = self.tables.lock();
            let sub = self.sub_capacity;
            tables
                .by_context
                .entry(context.id())
                .or_insert_with(|| Vec::with_capacity(sub))
                .push(registration.clone());
            for interface in registration.interfaces() {
                tables
                    .by_interface
                    .entry(interface.clone())
                    .or_insert_with(|| Vec::with_capacity(sub))
                    .push(registration.clone());
            }
            tables.all.push(registration.clone());
        }
        tracing::debug!(
            service = id,
            bundle = %bundle,
            interfaces = ?registration.interfaces(),
            "service registered"
        );
        self.publish_service_event(ServiceEvent::new(ServiceEventKind::Registered, registration.reference()));
        Ok(registration)
    }

    /// Finds services by interface name and/or filter.
    ///
    /// `None` (or an empty string) for `interface` means every service; `None` (or
    /// an empty string) for `filter` means no filtering. Unless
    /// `include_unassignable` is set, only services whose interfaces the context's
    /// bundle may use are returned.
    pub fn get_service_references(
        &self,
        context: &BundleContext,
        interface: Option<&str>,
        filter: Option<&str>,
        include_unassignable: bool,
    ) -> Result<Vec<ServiceReference>, FrameworkError> {
        let requester = context.bundle()?;
        let interface = interface.filter(|i| !i.is_empty());
        let filter = match filter.filter(|f| !f.trim().is_empty()) {
            Some(text) => Some(Filter::parse(text)?),
            None => None,
        };

        let candidates: Vec<ServiceRegistration> = {
            let tables = self.tables.lock();
            match interface {
                Some(name) => tables.by_interface.get(name).cloned().unwrap_or_default(),
                None => tables.all.clone(),
            }
        };

        let mut found: Vec<ServiceReference> = candidates
            .iter()
            .map(ServiceRegistration::reference)
            .filter(|r| r.state() != ServiceState::Unregistered)
            .filter(|r| filter.as_ref().is_none_or(|f| f.matches(&r.properties())))
            .filter(|r| {
                include_unassignable
                    || match interface {
                        Some(name) => r.is_assignable_to(&requester, name),
                        None => r.interfaces().iter().all(|i| r.is_assignable_to(&requester, i)),
                    }
            })
            .collect();
        sort_references(&mut found);
        Ok(found)
    }

    /// Highest-ranked service registered under `interface`, if any.
    pub fn get_service_reference(
        &self,
        context: &BundleContext,
        interface: &str,
    ) -> Result<Option<ServiceReference>, FrameworkError> {
        if interface.is_empty() {
            return Err(FrameworkError::invalid_argument("interface name is empty"));
        }
        Ok(self
            .get_service_references(context, Some(interface), None, false)?
            .into_iter()
            .next())
    }

    /// Services published by `context`, in registration order.
    pub fn get_registered_services(&self, context: &BundleContext) -> Vec<ServiceReference> {
        self.tables
            .lock()
            .by_context
            .get(&context.id())
            .map(|regs| regs.iter().map(ServiceRegistration::reference).collect())
            .unwrap_or_default()
    }

    /// Services `context` currently holds through `get_service`.
    pub fn get_services_in_use(&self, context: &BundleContext) -> Vec<ServiceReference> {
        context.inner().services_in_use()
    }

    /// Unregisters everything `context` published. Already-unregistered services
    /// are skipped.
    pub fn unregister_services(&self, context: &BundleContext) {
        let owned = self
            .tables
            .lock()
            .by_context
            .get(&context.id())
            .cloned()
            .unwrap_or_default();
        for registration in owned {
            if let Err(err) = registration.unregister() {
                tracing::debug!(service = registration.id(), "skipping unregister: {err}");
            }
        }
    }

    /// Releases every service `context` still holds.
    pub fn release_services_in_use(&self, context: &BundleContext) {
        context.inner().release_all();
    }

    /// Adds (or replaces) a service listener for `context`.
    ///
    /// Adding the same listener object again replaces its filter and keeps its
    /// handle; the previous entry stops receiving events immediately.
    pub fn add_service_listener(
        &self,
        context: &BundleContext,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<ListenerHandle, FrameworkError> {
        let filter = match filter.filter(|f| !f.trim().is_empty()) {
            Some(text) => Some(Filter::parse(text)?),
            None => None,
        };
        let dispatcher = context.inner().dispatcher();
        let mut tables = self.tables.lock();
        let entry = tables
            .listeners
            .entry(context.id())
            .or_insert_with(|| ContextListeners {
                dispatcher,
                table: ListenerTable::new(),
            });
        let (handle, old) = entry
            .table
            .insert(Listener::Service(FilteredServiceListener::new(listener, filter)));
        if let Some(Listener::Service(old)) = old {
            old.mark_removed();
        }
        Ok(handle)
    }

    /// Removes a service listener previously added by `context`.
    pub fn remove_service_listener(
        &self,
        context: &BundleContext,
        handle: ListenerHandle,
    ) -> Result<(), FrameworkError> {
        let removed = self
            .tables
            .lock()
            .listeners
            .get_mut(&context.id())
            .and_then(|entry| entry.table.remove(handle));
        match removed {
            Some(Listener::Service(listener)) => {
                listener.mark_removed();
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(EventError::UnknownHandle.into()),
        }
    }

    /// Drops every service listener `context` added.
    pub(crate) fn remove_all_service_listeners(&self, context: ContextId) {
        let removed = self.tables.lock().listeners.remove(&context);
        if let Some(entry) = removed {
            for listener in entry.table.values() {
                if let Listener::Service(l) = listener {
                    l.mark_removed();
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn has_service_listener(&self, context: ContextId, handle: ListenerHandle) -> bool {
        self.tables
            .lock()
            .listeners
            .get(&context)
            .is_some_and(|entry| entry.table.contains(handle))
    }

    /// Delivers a service event synchronously to every context's service listeners.
    pub(crate) fn publish_service_event(&self, event: ServiceEvent) {
        let snapshots: Vec<ListenerSnapshot> = {
            let tables = self.tables.lock();
            tables
                .listeners
                .values()
                .filter(|entry| !entry.table.is_empty())
                .map(|entry| ListenerSnapshot::from_map(entry.table.snapshot(), Arc::clone(&entry.dispatcher)))
                .collect()
        };
        if snapshots.is_empty() {
            return;
        }
        let mut queue = match self.events.new_queue() {
            Ok(queue) => queue,
            Err(err) => {
                tracing::debug!(service = event.reference.id(), "service event dropped: {err}");
                return;
            }
        };
        for snapshot in snapshots {
            if let Err(err) = queue.queue_snapshot(snapshot) {
                tracing::debug!(service = event.reference.id(), "service event dropped: {err}");
                return;
            }
        }
        queue.dispatch_sync(&Event::Service(event));
    }

    /// Drops `registration` from every table.
    pub(crate) fn remove_registration(&self, registration: &ServiceRegistration) {
        let id = registration.id();
        let mut tables = self.tables.lock();
        if let Some(regs) = tables.by_context.get_mut(&registration.owner()) {
            regs.retain(|r| r.id() != id);
            if regs.is_empty() {
                tables.by_context.remove(&registration.owner());
            }
        }
        for interface in registration.interfaces() {
            if let Some(regs) = tables.by_interface.get_mut(interface) {
                regs.retain(|r| r.id() != id);
                if regs.is_empty() {
                    tables.by_interface.remove(interface);
                }
            }
        }
        tables.all.retain(|r| r.id() != id);
    }
}
