//! Service registry and the handles around it.
//!
//! ## Contents
//! - [`ServiceRegistry`] tables of registrations plus per-context service listeners
//! - [`ServiceRegistration`] owner-side handle (modify properties, unregister)
//! - [`ServiceReference`] consumer-side handle (inspect, order, look up)
//! - [`ServiceObject`] / [`ServiceFactory`] / [`ServiceSource`] what gets registered
//! - [`Properties`] / [`Value`] / [`constants`] service metadata
//!
//! ## Architecture
//! ```text
//! BundleContext::register_service ─► ServiceRegistry (by_context / by_interface / all)
//!                                        │
//!                                        └─► publish REGISTERED (sync, per-context snapshot)
//! BundleContext::get_service ─► ServiceUse (per context, per registration)
//!                                  └─► ServiceObject clone or ServiceFactory::get_service
//! ServiceRegistration::unregister ─► UNREGISTERING ─► release every using context ─► removed
//! ```

mod object;
mod properties;
mod registration;
mod registry;
mod service_use;

pub use object::{ServiceFactory, ServiceObject, ServiceSource};
pub use properties::{Properties, Value, constants};
pub use registration::{RegistrationId, ServiceReference, ServiceRegistration, ServiceState};
pub use registry::ServiceRegistry;

pub(crate) use registration::sort_references;
pub(crate) use service_use::ServiceUse;
