//! # bundlevisor
//!
//! **Bundlevisor** is the execution-context, service-registry and event-delivery
//! core of a modular plugin runtime.
//!
//! Bundles (units of code installed by a hosting framework) get a
//! [`BundleContext`] while active. Through it they publish services under
//! interface names, look up and use services published by others, and observe
//! bundle, service and framework events.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Bundle A   │   │   Bundle B   │   │   Bundle C   │
//!     │ (activator)  │   │ (activator)  │   │ (activator)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │BundleContext │   │BundleContext │   │BundleContext │
//!     │ services in  │   │ services in  │   │ services in  │
//!     │ use, dispatch│   │ use, dispatch│   │ use, dispatch│
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Framework (shared state)                                         │
//! │  - ServiceRegistry (registrations + service listener tables)      │
//! │  - EventPublisher  (bundle / framework listener tables)           │
//! │  - EventManager    (listener queues + worker thread)              │
//! │  - BundleHost      (installed bundles, assignability, hooks)      │
//! └──────┬──────────────────────────────────────┬─────────────────────┘
//!        │ dispatch_sync                        │ dispatch_async
//!        ▼                                      ▼
//!   caller thread                      ┌────────────────────────┐
//!   (service events, sync              │ worker thread          │
//!    bundle listeners)                 │ (tokio current_thread, │
//!                                      │  mpsc + cancel token)  │
//!                                      └───────────┬────────────┘
//!                                                  ▼
//!                             bundle listeners, framework listeners
//! ```
//!
//! ### Delivery
//! ```text
//! publish ──► snapshot listener tables (under lock) ──► ListenerQueue
//!                                                         │
//!           for each snapshot: dispatcher.dispatch(handle, listener, event)
//!                                                         │
//!           listener error/panic ──► BundleHost::on_listener_error
//!                                └─► framework ERROR event (never for an ERROR event)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                  |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------------------|
//! | **Contexts**      | Per-bundle handle; releases everything on close.              | [`BundleContext`], [`BundleActivator`]              |
//! | **Services**      | Register, look up, rank and use services.                     | [`ServiceRegistry`], [`ServiceReference`], [`ServiceObject`], [`ServiceFactory`] |
//! | **Filters**       | LDAP-style property filters.                                  | [`Filter`], [`Properties`]                          |
//! | **Events**        | Snapshot-based sync/async delivery.                           | [`EventManager`], [`ListenerQueue`], [`EventDispatcher`] |
//! | **Listeners**     | Bundle, service and framework observers.                      | [`BundleListener`], [`ServiceListener`], [`FrameworkListener`] |
//! | **Errors**        | Typed errors for callers, queues and listeners.               | [`FrameworkError`], [`EventError`], [`ListenerError`] |
//! | **Configuration** | Centralize runtime settings.                                  | [`Config`]                                          |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use bundlevisor::{
//!     BoxError, BundleActivator, BundleContext, Config, MemoryHost, Properties, Runtime,
//!     ServiceObject,
//! };
//!
//! struct Echo;
//!
//! impl BundleActivator for Echo {
//!     fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
//!         let svc = ServiceObject::new(String::from("echo")).provides(["Echo"]);
//!         ctx.register_service(["Echo"], svc, Properties::new().with("service.ranking", 5))?;
//!         Ok(())
//!     }
//!
//!     fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Arc::new(MemoryHost::new());
//!     let runtime = Runtime::builder(Config::default()).with_host(host.clone()).build();
//!     runtime.launch();
//!
//!     let provider = host.install("echo.provider", "file:echo");
//!     runtime.start_bundle(&provider, Arc::new(Echo))?;
//!
//!     let client = runtime.framework().create_context(host.install("client", "file:client"));
//!     let reference = client.get_service_reference("Echo")?.expect("registered");
//!     let service = client.get_service(&reference)?.expect("available");
//!     assert_eq!(service.downcast::<String>().as_deref().map(String::as_str), Some("echo"));
//!     assert!(client.unget_service(&reference)?);
//!
//!     client.close();
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```
mod bundle;
mod config;
mod core;
mod error;
mod events;
mod filter;
mod listeners;
mod services;

// ---- Public re-exports ----

pub use bundle::{Bundle, BundleActivator, BundleHost, BundleId, MemoryHost};
pub use config::{Config, DEFAULT_EVENT_THREAD_NAME};
pub use core::{
    BundleContext, ContextId, Framework, Runtime, RuntimeBuilder, SYSTEM_BUNDLE_ID,
};
pub use error::{
    ActivatorPhase, BoxError, EventError, FilterError, FrameworkError, ListenerError,
};
pub use events::{
    BundleEvent, BundleEventKind, BundleSignal, Event, EventDispatcher, EventManager,
    EventPublisher, FrameworkEvent, FrameworkEventKind, ListenerQueue, ListenerSnapshot,
    ServiceEvent, ServiceEventKind, Worker,
};
pub use filter::Filter;
pub use listeners::{
    BundleListener, FilteredServiceListener, FrameworkListener, Listener, ListenerHandle,
    ServiceListener,
};
pub use services::{
    Properties, RegistrationId, ServiceFactory, ServiceObject, ServiceReference,
    ServiceRegistration, ServiceRegistry, ServiceSource, ServiceState, Value, constants,
};

// Optional: expose a simple built-in logger listener (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use listeners::LogWriter;
