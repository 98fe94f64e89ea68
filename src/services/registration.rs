//! # Service registrations and references.
//!
//! A [`ServiceRegistration`] is the registrant's handle; a [`ServiceReference`] is
//! what consumers see. Both share one registration record, so a reference stays
//! readable (id, interfaces, properties) after the service is gone.
//!
//! ## Lifecycle
//! ```text
//! Registered ──set_properties──► Registered (MODIFIED / MODIFIED_ENDMATCH)
//!     │
//!     └─unregister──► Unregistering (UNREGISTERING published, users still served)
//!                          │
//!                          └──► Unregistered (users released, tables cleared)
//! ```
//!
//! ## Ordering
//! References order by ranking (highest first), then by id (lowest first). That is
//! the order lookups return and the reason the single-reference lookup yields the
//! "best" service.

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bundle::Bundle;
use crate::core::{ContextId, ContextInner};
use crate::error::FrameworkError;
use crate::events::{ServiceEvent, ServiceEventKind};
use crate::services::properties::constants::{OBJECTCLASS, SERVICE_ID, SERVICE_RANKING};
use crate::services::{Properties, ServiceRegistry, ServiceSource, Value};

/// Identifier of a registration, unique per registry and never reused.
pub type RegistrationId = u64;

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Registered,
    Unregistering,
    Unregistered,
}

struct Mutable {
    properties: Properties,
    ranking: i32,
    state: ServiceState,
    bundle: Option<Bundle>,
}

pub(crate) struct RegistrationInner {
    id: RegistrationId,
    interfaces: Vec<String>,
    source: ServiceSource,
    owner: ContextId,
    registrant: Bundle,
    registry: Weak<ServiceRegistry>,
    mutable: Mutex<Mutable>,
    users: Mutex<HashMap<ContextId, Weak<ContextInner>>>,
}

/// Registrant-side handle of a published service.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
}

/// Consumer-side handle of a published service.
///
/// Two references are equal iff they refer to the same registration.
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<RegistrationInner>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: RegistrationId,
        interfaces: Vec<String>,
        source: ServiceSource,
        owner: ContextId,
        registrant: Bundle,
        registry: Weak<ServiceRegistry>,
        properties: Properties,
    ) -> Self {
        let (properties, ranking) = stamp_properties(properties, &interfaces, id);
        Self {
            inner: Arc::new(RegistrationInner {
                id,
                interfaces,
                source,
                owner,
                registrant: registrant.clone(),
                registry,
                mutable: Mutex::new(Mutable {
                    properties,
                    ranking,
                    state: ServiceState::Registered,
                    bundle: Some(registrant),
                }),
                users: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> RegistrationId {
        self.inner.id
    }

    /// Consumer-side handle for this registration.
    pub fn reference(&self) -> ServiceReference {
        ServiceReference {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.inner.mutable.lock().state
    }

    #[inline]
    pub fn is_unregistered(&self) -> bool {
        self.state() == ServiceState::Unregistered
    }

    /// Replaces the user-supplied properties and publishes `Modified`.
    ///
    /// `objectClass` and `service.id` keep their registry-assigned values; the
    /// ranking is recomputed. Fails with [`FrameworkError::InvalidState`] once
    /// unregistered.
    pub fn set_properties(&self, properties: Properties) -> Result<(), FrameworkError> {
        let event = {
            let mut m = self.inner.mutable.lock();
            if m.state == ServiceState::Unregistered {
                return Err(FrameworkError::invalid_state(format!(
                    "service {} is unregistered",
                    self.inner.id
                )));
            }
            let (stamped, ranking) = stamp_properties(properties, &self.inner.interfaces, self.inner.id);
            let previous = std::mem::replace(&mut m.properties, stamped.clone());
            m.ranking = ranking;
            ServiceEvent::modified(self.reference(), previous, stamped)
        };
        tracing::debug!(service = self.inner.id, "service properties modified");
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.publish_service_event(event);
        }
        Ok(())
    }

    /// Withdraws the service.
    ///
    /// Publishes `Unregistering` synchronously, releases every context still using
    /// the service (calling the factory's `unget_service` where applicable), and
    /// removes it from the registry. Fails with [`FrameworkError::InvalidState`]
    /// if the service is no longer registered.
    pub fn unregister(&self) -> Result<(), FrameworkError> {
        {
            let mut m = self.inner.mutable.lock();
            if m.state != ServiceState::Registered {
                return Err(FrameworkError::invalid_state(format!(
                    "service {} is already unregistered",
                    self.inner.id
                )));
            }
            m.state = ServiceState::Unregistering;
        }
        let registry = self.inner.registry.upgrade();
        if let Some(registry) = &registry {
            registry.publish_service_event(ServiceEvent::new(ServiceEventKind::Unregistering, self.reference()));
        }

        let users: Vec<Weak<ContextInner>> = {
            let mut m = self.inner.mutable.lock();
            m.state = ServiceState::Unregistered;
            m.bundle = None;
            let mut users = self.inner.users.lock();
            users.drain().map(|(_, ctx)| ctx).collect()
        };
        for user in users.iter().filter_map(Weak::upgrade) {
            user.release_service(self.inner.id);
        }
        if let Some(registry) = &registry {
            registry.remove_registration(self);
        }
        tracing::debug!(service = self.inner.id, released = users.len(), "service unregistered");
        Ok(())
    }

    #[inline]
    pub(crate) fn source(&self) -> &ServiceSource {
        &self.inner.source
    }

    #[inline]
    pub(crate) fn owner(&self) -> ContextId {
        self.inner.owner
    }

    #[inline]
    pub(crate) fn interfaces(&self) -> &[String] {
        &self.inner.interfaces
    }

    pub(crate) fn add_user(&self, context: &Arc<ContextInner>) {
        self.inner
            .users
            .lock()
            .entry(context.id())
            .or_insert_with(|| Arc::downgrade(context));
    }

    pub(crate) fn remove_user(&self, context: ContextId) {
        self.inner.users.lock().remove(&context);
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.inner.id)
            .field("interfaces", &self.inner.interfaces)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceReference {
    #[inline]
    pub fn id(&self) -> RegistrationId {
        self.inner.id
    }

    /// Current `service.ranking` (0 when absent or not an `i32`).
    pub fn ranking(&self) -> i32 {
        self.inner.mutable.lock().ranking
    }

    /// Interface names, sorted.
    #[inline]
    pub fn interfaces(&self) -> &[String] {
        &self.inner.interfaces
    }

    /// Looks up a property; keys are case-insensitive.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.mutable.lock().properties.get(key).cloned()
    }

    /// Property keys in insertion order.
    pub fn property_keys(&self) -> Vec<String> {
        self.inner
            .mutable
            .lock()
            .properties
            .keys()
            .map(str::to_string)
            .collect()
    }

    /// Copy of the current properties.
    pub fn properties(&self) -> Properties {
        self.inner.mutable.lock().properties.clone()
    }

    /// Registering bundle; `None` once unregistered.
    pub fn bundle(&self) -> Option<Bundle> {
        self.inner.mutable.lock().bundle.clone()
    }

    pub fn state(&self) -> ServiceState {
        self.inner.mutable.lock().state
    }

    /// Bundles currently holding the service through `get_service`.
    pub fn using_bundles(&self) -> Vec<Bundle> {
        let users = self.inner.users.lock();
        let mut bundles: Vec<Bundle> = users
            .values()
            .filter_map(Weak::upgrade)
            .map(|ctx| ctx.bundle().clone())
            .collect();
        bundles.sort_by_key(Bundle::id);
        bundles.dedup();
        bundles
    }

    /// Returns `true` if `bundle` may use `interface` of this service.
    ///
    /// Always `true` for the registering bundle; otherwise the host decides.
    pub fn is_assignable_to(&self, bundle: &Bundle, interface: &str) -> bool {
        if *bundle == self.inner.registrant {
            return true;
        }
        match self.inner.registry.upgrade() {
            Some(registry) => registry.host().is_assignable(bundle, &self.inner.registrant, interface),
            None => true,
        }
    }

    pub(crate) fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Sorts `refs` best first, reading each ranking once.
pub(crate) fn sort_references(refs: &mut [ServiceReference]) {
    refs.sort_by_cached_key(|r| (Reverse(r.ranking()), r.id()));
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

/// Compares live rankings; a ranking changed mid-sort breaks the order, so
/// shared lists go through `sort_references` instead.
impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.inner.id == other.inner.id {
            return Ordering::Equal;
        }
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.inner.id.cmp(&other.inner.id))
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id)
            .field("interfaces", &self.inner.interfaces)
            .field("ranking", &self.ranking())
            .finish()
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inner.interfaces)
    }
}

fn is_reserved(key: &str) -> bool {
    key.eq_ignore_ascii_case(OBJECTCLASS) || key.eq_ignore_ascii_case(SERVICE_ID)
}

/// Drops caller-supplied reserved keys, stamps `objectClass` and `service.id`,
/// and extracts the ranking.
fn stamp_properties(user: Properties, interfaces: &[String], id: RegistrationId) -> (Properties, i32) {
    let mut props: Properties = user.iter().filter(|(k, _)| !is_reserved(k)).map(|(k, v)| (k, v.clone())).collect();
    props.insert(
        OBJECTCLASS,
        Value::List(interfaces.iter().cloned().map(Value::String).collect()),
    );
    props.insert(SERVICE_ID, i64::try_from(id).unwrap_or(i64::MAX));
    let ranking = props
        .get(SERVICE_RANKING)
        .and_then(Value::as_int)
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0);
    (props, ranking)
}
