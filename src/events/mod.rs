//! # Event model and snapshot-based delivery.
//!
//! This module groups the event types with the machinery that delivers them:
//! - [`Event`] tagged union over bundle, service and framework events
//! - [`EventDispatcher`] addressee-specific delivery of one event to one listener
//! - [`ListenerQueue`] / [`ListenerSnapshot`] frozen listener sets queued for one dispatch
//! - [`EventManager`] / [`Worker`] queue factory and the asynchronous delivery thread
//! - [`EventPublisher`] per-context bundle and framework listener tables
//!
//! ## Architecture
//! ```text
//! publisher ──► EventManager::new_queue() ──► ListenerQueue
//!                                               │ queue_listeners(snapshot, dispatcher) × N
//!                                               ▼
//!                     ┌───────────── dispatch_sync(event) ──► caller thread
//!                     │
//!                     └──────────── dispatch_async(event) ──► Worker::post ──► mpsc ──► worker thread
//!                                                                                  │
//!                                              for each listener in snapshot:      ▼
//!                                              dispatcher.dispatch(handle, listener, event)
//! ```
//!
//! ## Rules
//! - A snapshot is immutable: listeners added or removed after it was taken are
//!   not affected by (and do not affect) the delivery in progress.
//! - Asynchronous deliveries from one thread arrive in posting order.
//! - A failing listener is logged and skipped; the remaining listeners still run.

mod dispatcher;
mod event;
mod manager;
mod publisher;
mod queue;

pub use dispatcher::EventDispatcher;
pub use event::{
    BundleEvent, BundleEventKind, BundleSignal, Event, FrameworkEvent, FrameworkEventKind,
    ServiceEvent, ServiceEventKind,
};
pub use manager::{EventManager, Worker};
pub use publisher::EventPublisher;
pub use queue::{ListenerQueue, ListenerSnapshot};

pub(crate) use publisher::ListenerKind;
