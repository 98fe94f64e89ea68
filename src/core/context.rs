//! # Bundle execution context.
//!
//! A [`BundleContext`] is a bundle's handle on the runtime while it is active.
//! Every service, listener and lookup operation goes through it, and everything it
//! acquired is given back when it is closed.
//!
//! ## Close order
//! ```text
//! close()
//!   ├─► remove service listeners          (no further service events)
//!   ├─► unregister own services           (UNREGISTERING to everyone else)
//!   ├─► release services still in use     (factory unget_service)
//!   ├─► drop bundle / framework listeners
//!   └─► mark invalid                      (every later call: InvalidContext)
//! ```
//!
//! ## Listener failures
//! Listeners added through a context are delivered through that context's
//! dispatcher. It skips delivery once the context is closed and turns listener
//! errors and panics into framework `Error` events.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bundle::{Bundle, BundleActivator, BundleId};
use crate::core::Framework;
use crate::error::{ActivatorPhase, FrameworkError, ListenerError, panic_message};
use crate::events::{Event, EventDispatcher, FrameworkEvent, FrameworkEventKind, ListenerKind};
use crate::filter::Filter;
use crate::listeners::{BundleListener, FrameworkListener, Listener, ListenerHandle, ServiceListener};
use crate::services::{
    Properties, RegistrationId, ServiceObject, ServiceReference, ServiceRegistration,
    ServiceSource, ServiceState, ServiceUse, sort_references,
};

/// Identifier of a bundle context, unique for the lifetime of the process.
pub type ContextId = u64;

static CONTEXT_SEQ: AtomicU64 = AtomicU64::new(1);

struct UseEntry {
    registration: ServiceRegistration,
    record: Arc<Mutex<ServiceUse>>,
}

pub(crate) struct ContextInner {
    id: ContextId,
    bundle: Bundle,
    valid: AtomicBool,
    framework: Framework,
    services_in_use: Mutex<HashMap<RegistrationId, UseEntry>>,
    activator: Mutex<Option<Arc<dyn BundleActivator>>>,
    dispatcher: Arc<dyn EventDispatcher>,
    closing: AtomicBool,
}

impl ContextInner {
    #[inline]
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub(crate) fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn dispatcher(&self) -> Arc<dyn EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub(crate) fn services_in_use(&self) -> Vec<ServiceReference> {
        let mut refs: Vec<ServiceReference> = self
            .services_in_use
            .lock()
            .values()
            .map(|entry| entry.registration.reference())
            .collect();
        sort_references(&mut refs);
        refs
    }

    /// Zeroes and releases this context's use of one service.
    pub(crate) fn release_service(&self, id: RegistrationId) {
        let entry = self.services_in_use.lock().remove(&id);
        if let Some(entry) = entry {
            entry.record.lock().release(&self.bundle);
        }
    }

    /// Releases every service this context still holds.
    pub(crate) fn release_all(&self) {
        let entries: Vec<UseEntry> = self.services_in_use.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.record.lock().release(&self.bundle);
            entry.registration.remove_user(self.id);
        }
    }

    fn use_record(&self, registration: &ServiceRegistration) -> Arc<Mutex<ServiceUse>> {
        let mut map = self.services_in_use.lock();
        let entry = map.entry(registration.id()).or_insert_with(|| UseEntry {
            registration: registration.clone(),
            record: Arc::new(Mutex::new(ServiceUse::new(registration.clone()))),
        });
        Arc::clone(&entry.record)
    }

    /// Returns `true` while `record` is the live entry for `registration`.
    fn holds(&self, registration: &ServiceRegistration, record: &Arc<Mutex<ServiceUse>>) -> bool {
        self.services_in_use
            .lock()
            .get(&registration.id())
            .is_some_and(|entry| Arc::ptr_eq(&entry.record, record))
    }

    /// Drops the record if nobody holds the service any more.
    ///
    /// Waits for the record lock, then removes the entry while still holding it.
    /// Lock order is record, then table; `get_service` re-checks the entry after
    /// taking the record lock and retries on a fresh record if it was dropped.
    fn discard_if_unused(&self, registration: &ServiceRegistration, record: &Arc<Mutex<ServiceUse>>) {
        let guard = record.lock();
        if guard.use_count() != 0 {
            return;
        }
        let mut map = self.services_in_use.lock();
        if map
            .get(&registration.id())
            .is_some_and(|entry| Arc::ptr_eq(&entry.record, record))
        {
            map.remove(&registration.id());
            drop(map);
            registration.remove_user(self.id);
        }
        drop(guard);
    }

    fn invalid(&self) -> FrameworkError {
        FrameworkError::InvalidContext {
            bundle: self.bundle.symbolic_name().to_string(),
        }
    }
}

/// Delivers events to listeners added through one context.
struct ContextDispatcher {
    context: Weak<ContextInner>,
}

impl EventDispatcher for ContextDispatcher {
    fn dispatch(
        &self,
        _handle: ListenerHandle,
        listener: &Listener,
        event: &Event,
    ) -> Result<(), ListenerError> {
        let Some(ctx) = self.context.upgrade() else {
            return Ok(());
        };
        if !ctx.is_valid() {
            return Ok(());
        }
        if let (Listener::Service(_), Event::Service(ev)) = (listener, event) {
            let visible = ev
                .reference
                .interfaces()
                .iter()
                .all(|i| ev.reference.is_assignable_to(&ctx.bundle, i));
            if !visible {
                return Ok(());
            }
        }

        let result = listener.invoke(event);
        if let Err(err) = &result {
            ctx.framework.host().on_listener_error(&ctx.bundle, err);
            if !event.is_framework_error() {
                ctx.framework.publisher().publish_framework_event(
                    FrameworkEvent::new(FrameworkEventKind::Error)
                        .with_bundle(ctx.bundle.clone())
                        .with_error(err.to_string()),
                );
            }
        }
        result
    }
}

/// A bundle's handle on the runtime.
///
/// Cheap to clone; all clones share one state. Once [`close`](Self::close) ran,
/// every operation except `id`, `is_valid` and `close` fails with
/// [`FrameworkError::InvalidContext`].
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl BundleContext {
    pub(crate) fn new(bundle: Bundle, framework: Framework) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ContextInner>| ContextInner {
            id: CONTEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            bundle,
            valid: AtomicBool::new(true),
            framework,
            services_in_use: Mutex::new(HashMap::new()),
            activator: Mutex::new(None),
            dispatcher: Arc::new(ContextDispatcher {
                context: weak.clone(),
            }),
            closing: AtomicBool::new(false),
        });
        tracing::debug!(context = inner.id, bundle = %inner.bundle, "bundle context created");
        Self { inner }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn check_valid(&self) -> Result<(), FrameworkError> {
        if self.inner.is_valid() {
            Ok(())
        } else {
            Err(self.inner.invalid())
        }
    }

    /// The bundle this context belongs to.
    pub fn bundle(&self) -> Result<Bundle, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.bundle.clone())
    }

    /// Framework property from the host.
    pub fn property(&self, key: &str) -> Result<Option<String>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.host().property(key))
    }

    pub fn bundle_by_id(&self, id: BundleId) -> Result<Option<Bundle>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.host().bundle(id))
    }

    pub fn bundle_by_location(&self, location: &str) -> Result<Option<Bundle>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.host().bundle_by_location(location))
    }

    pub fn bundles(&self) -> Result<Vec<Bundle>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.host().bundles())
    }

    /// Path of `name` inside this bundle's private data area, creating the area
    /// on first use. `None` when no data root is configured or it cannot be created.
    pub fn data_file(&self, name: &str) -> Result<Option<PathBuf>, FrameworkError> {
        self.check_valid()?;
        let Some(root) = self.inner.framework.config().data_root() else {
            return Ok(None);
        };
        let dir = root.join(self.inner.bundle.id().to_string());
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(bundle = %self.inner.bundle, dir = %dir.display(), "cannot create data area: {err}");
            return Ok(None);
        }
        Ok(Some(dir.join(name)))
    }

    /// Adds an asynchronous bundle listener.
    pub fn add_bundle_listener(&self, listener: Arc<dyn BundleListener>) -> Result<ListenerHandle, FrameworkError> {
        self.add_listener(ListenerKind::Bundle, Listener::Bundle(listener))
    }

    /// Adds a bundle listener called on the publishing thread.
    pub fn add_synchronous_bundle_listener(
        &self,
        listener: Arc<dyn BundleListener>,
    ) -> Result<ListenerHandle, FrameworkError> {
        self.add_listener(ListenerKind::SynchronousBundle, Listener::Bundle(listener))
    }

    /// Removes a bundle listener, synchronous or not.
    ///
    /// Handles are unique per registration: a listener added both synchronously
    /// and asynchronously holds two handles, and each call removes only the one
    /// entry its handle names.
    pub fn remove_bundle_listener(&self, handle: ListenerHandle) -> Result<(), FrameworkError> {
        self.check_valid()?;
        let publisher = self.inner.framework.publisher();
        if publisher.contains(ListenerKind::SynchronousBundle, self.inner.id, handle) {
            publisher.remove_listener(ListenerKind::SynchronousBundle, self.inner.id, handle)?;
        } else {
            publisher.remove_listener(ListenerKind::Bundle, self.inner.id, handle)?;
        }
        Ok(())
    }

    pub fn add_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
    ) -> Result<ListenerHandle, FrameworkError> {
        self.add_listener(ListenerKind::Framework, Listener::Framework(listener))
    }

    pub fn remove_framework_listener(&self, handle: ListenerHandle) -> Result<(), FrameworkError> {
        self.check_valid()?;
        self.inner
            .framework
            .publisher()
            .remove_listener(ListenerKind::Framework, self.inner.id, handle)?;
        Ok(())
    }

    /// Adds a service listener; with a filter, it only sees matching services.
    ///
    /// Fails with [`FrameworkError::InvalidFilterSyntax`] for a malformed filter.
    pub fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<ListenerHandle, FrameworkError> {
        self.check_valid()?;
        self.inner.framework.registry().add_service_listener(self, listener, filter)
    }

    pub fn remove_service_listener(&self, handle: ListenerHandle) -> Result<(), FrameworkError> {
        self.check_valid()?;
        self.inner.framework.registry().remove_service_listener(self, handle)
    }

    fn add_listener(&self, kind: ListenerKind, listener: Listener) -> Result<ListenerHandle, FrameworkError> {
        self.check_valid()?;
        Ok(self
            .inner
            .framework
            .publisher()
            .add_listener(kind, self.inner.id, &self.inner.dispatcher, listener))
    }

    /// Publishes a service under one or more interface names.
    pub fn register_service<I, S>(
        &self,
        interfaces: I,
        service: impl Into<ServiceSource>,
        properties: Properties,
    ) -> Result<ServiceRegistration, FrameworkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.check_valid()?;
        self.inner
            .framework
            .registry()
            .register_service(self, interfaces, service, properties)
    }

    /// Services this bundle may use, by interface and/or filter.
    pub fn get_service_references(
        &self,
        interface: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, FrameworkError> {
        self.check_valid()?;
        self.inner
            .framework
            .registry()
            .get_service_references(self, interface, filter, false)
    }

    /// Like [`get_service_references`](Self::get_service_references), without the
    /// assignability check.
    pub fn get_all_service_references(
        &self,
        interface: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, FrameworkError> {
        self.check_valid()?;
        self.inner
            .framework
            .registry()
            .get_service_references(self, interface, filter, true)
    }

    /// Highest-ranked service under `interface`.
    pub fn get_service_reference(&self, interface: &str) -> Result<Option<ServiceReference>, FrameworkError> {
        self.check_valid()?;
        self.inner.framework.registry().get_service_reference(self, interface)
    }

    /// Gets the service object and increments this context's use count.
    ///
    /// Returns `None` when the service is unregistered, or when its factory fails
    /// (the failure is published as a framework `Error` event).
    pub fn get_service(&self, reference: &ServiceReference) -> Result<Option<ServiceObject>, FrameworkError> {
        self.check_valid()?;
        let registration = reference.registration();
        if registration.state() == ServiceState::Unregistered {
            return Ok(None);
        }
        let (record, outcome) = loop {
            let record = self.inner.use_record(&registration);
            let mut guard = record.lock();
            if !self.inner.holds(&registration, &record) {
                continue;
            }
            registration.add_user(&self.inner);
            let outcome = guard.get(&self.inner.bundle);
            drop(guard);
            break (record, outcome);
        };
        match outcome {
            Ok(Some(object)) => Ok(Some(object)),
            Ok(None) => {
                self.inner.discard_if_unused(&registration, &record);
                Ok(None)
            }
            Err(err) => {
                self.inner.discard_if_unused(&registration, &record);
                tracing::warn!(
                    service = registration.id(),
                    bundle = %self.inner.bundle,
                    "service factory failed: {err}"
                );
                self.inner.framework.publisher().publish_framework_event(
                    FrameworkEvent::new(FrameworkEventKind::Error)
                        .with_bundle(self.inner.bundle.clone())
                        .with_error(err.to_string()),
                );
                Ok(None)
            }
        }
    }

    /// Decrements this context's use count; releases the object at zero.
    ///
    /// Returns `false` if the context did not hold the service.
    pub fn unget_service(&self, reference: &ServiceReference) -> Result<bool, FrameworkError> {
        self.check_valid()?;
        let registration = reference.registration();
        let record = self
            .inner
            .services_in_use
            .lock()
            .get(&registration.id())
            .map(|entry| Arc::clone(&entry.record));
        let Some(record) = record else {
            return Ok(false);
        };
        let (ungot, unused) = {
            let mut r = record.lock();
            let ungot = r.unget(&self.inner.bundle);
            (ungot, r.use_count() == 0)
        };
        if unused {
            self.inner.discard_if_unused(&registration, &record);
        }
        Ok(ungot)
    }

    /// Services this context published that are still registered.
    pub fn registered_services(&self) -> Result<Vec<ServiceReference>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.registry().get_registered_services(self))
    }

    /// Services this context currently holds.
    pub fn services_in_use(&self) -> Result<Vec<ServiceReference>, FrameworkError> {
        self.check_valid()?;
        Ok(self.inner.framework.registry().get_services_in_use(self))
    }

    pub fn create_filter(&self, text: &str) -> Result<Filter, FrameworkError> {
        self.check_valid()?;
        Ok(Filter::parse(text)?)
    }

    /// Runs the activator's `start`. Errors and panics come back as
    /// [`FrameworkError::BundleActivator`].
    pub fn start(&self, activator: Arc<dyn BundleActivator>) -> Result<(), FrameworkError> {
        self.check_valid()?;
        *self.inner.activator.lock() = Some(Arc::clone(&activator));
        let outcome = catch_unwind(AssertUnwindSafe(|| activator.start(self)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()));
        outcome.map_err(|source| {
            self.inner.activator.lock().take();
            self.activator_error(ActivatorPhase::Start, source)
        })
    }

    /// Runs the activator's `stop`, if `start` succeeded earlier.
    pub fn stop(&self) -> Result<(), FrameworkError> {
        self.check_valid()?;
        let Some(activator) = self.inner.activator.lock().take() else {
            return Ok(());
        };
        catch_unwind(AssertUnwindSafe(|| activator.stop(self)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
            .map_err(|source| self.activator_error(ActivatorPhase::Stop, source))
    }

    fn activator_error(&self, phase: ActivatorPhase, source: crate::error::BoxError) -> FrameworkError {
        tracing::warn!(bundle = %self.inner.bundle, %phase, "activator failed: {source}");
        FrameworkError::BundleActivator {
            bundle: self.inner.bundle.symbolic_name().to_string(),
            phase,
            source,
        }
    }

    /// Gives back everything this context acquired and invalidates it. Idempotent.
    pub fn close(&self) {
        if self
            .inner
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let registry = self.inner.framework.registry();
        registry.remove_all_service_listeners(self.inner.id);
        registry.unregister_services(self);
        registry.release_services_in_use(self);
        self.inner.framework.publisher().remove_context(self.inner.id);
        self.inner.activator.lock().take();
        self.inner.valid.store(false, Ordering::Release);
        tracing::debug!(context = self.inner.id, bundle = %self.inner.bundle, "bundle context closed");
    }
}

impl std::fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleContext")
            .field("id", &self.inner.id)
            .field("bundle", &self.inner.bundle)
            .field("valid", &self.is_valid())
            .finish()
    }
}
