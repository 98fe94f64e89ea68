//! # Registered service objects and factories.
//!
//! A service is either a shared [`ServiceObject`] handed to every consumer, or a
//! [`ServiceFactory`] asked for a per-bundle object on first use and told when
//! that bundle releases it.
//!
//! A [`ServiceObject`] carries the set of interface names its value provides. The
//! registry refuses to publish an object under an interface it does not provide,
//! and discards factory products that fail the same check.

use std::any::{Any, type_name};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::error::BoxError;
use crate::services::ServiceRegistration;

/// Type-erased, shareable service value.
///
/// # Example
/// ```
/// use bundlevisor::ServiceObject;
///
/// let obj = ServiceObject::new(String::from("hi")).provides(["Greeting"]);
/// assert!(obj.provides_interface("Greeting"));
/// assert_eq!(obj.downcast::<String>().as_deref().map(String::as_str), Some("hi"));
/// assert!(obj.downcast::<u32>().is_none());
/// ```
#[derive(Clone)]
pub struct ServiceObject {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    interfaces: BTreeSet<String>,
}

impl ServiceObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared value.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            interfaces: BTreeSet::new(),
        }
    }

    /// Declares interface names this value provides.
    #[must_use]
    pub fn provides<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces.extend(interfaces.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if the value was declared to provide `interface`.
    #[inline]
    pub fn provides_interface(&self, interface: &str) -> bool {
        self.interfaces.contains(interface)
    }

    /// Declared interface names, sorted.
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.interfaces.iter().map(String::as_str)
    }

    /// Returns the concrete value if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Borrowing variant of [`downcast`](Self::downcast).
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns `true` if both handles point at the same value.
    #[inline]
    pub fn ptr_eq(&self, other: &ServiceObject) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }

    /// First interface in `interfaces` this value does not provide.
    pub(crate) fn first_missing<'a>(&self, interfaces: &'a [String]) -> Option<&'a str> {
        interfaces
            .iter()
            .find(|i| !self.provides_interface(i))
            .map(String::as_str)
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObject")
            .field("type", &self.type_name)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

/// Produces one service object per consuming bundle.
///
/// `get_service` runs on the consumer's thread the first time that bundle gets
/// the service; `unget_service` runs when its use count drops to zero or the
/// service is unregistered.
pub trait ServiceFactory: Send + Sync + 'static {
    /// Creates the object `bundle` will use.
    fn get_service(
        &self,
        bundle: &Bundle,
        registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError>;

    /// Releases an object previously created for `bundle`.
    fn unget_service(
        &self,
        _bundle: &Bundle,
        _registration: &ServiceRegistration,
        _service: &ServiceObject,
    ) {
    }
}

/// What a registration publishes.
#[derive(Clone)]
pub enum ServiceSource {
    /// One object shared by every consumer.
    Object(ServiceObject),
    /// A factory asked once per consuming bundle.
    Factory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
    /// Wraps a factory.
    pub fn factory(factory: impl ServiceFactory) -> Self {
        ServiceSource::Factory(Arc::new(factory))
    }

    #[inline]
    pub fn is_factory(&self) -> bool {
        matches!(self, ServiceSource::Factory(_))
    }
}

impl From<ServiceObject> for ServiceSource {
    fn from(obj: ServiceObject) -> Self {
        ServiceSource::Object(obj)
    }
}

impl From<Arc<dyn ServiceFactory>> for ServiceSource {
    fn from(factory: Arc<dyn ServiceFactory>) -> Self {
        ServiceSource::Factory(factory)
    }
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Object(obj) => f.debug_tuple("Object").field(obj).finish(),
            ServiceSource::Factory(_) => f.write_str("Factory"),
        }
    }
}
