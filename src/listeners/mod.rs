//! # Listener traits and listener tables.
//!
//! Bundles observe the runtime through three listener traits:
//! - [`BundleListener`] bundle lifecycle changes (asynchronous or synchronous)
//! - [`ServiceListener`] service registrations, optionally behind a [`Filter`](crate::Filter)
//! - [`FrameworkListener`] runtime-wide notifications
//!
//! Every added listener gets a [`ListenerHandle`]; the same handle removes it.
//! Listeners are stored in copy-on-write tables so that taking a delivery snapshot
//! is a pointer copy and later additions or removals never affect it.
//!
//! ## Failure isolation
//! A listener error or panic never reaches the publisher. The owning context's
//! dispatcher reports it to [`BundleHost::on_listener_error`](crate::BundleHost::on_listener_error)
//! and re-publishes it as a framework `Error` event (unless the failing delivery
//! was itself an `Error` event).

mod filtered;
mod listener;
#[cfg(feature = "logging")]
mod log;
mod table;

pub use filtered::FilteredServiceListener;
pub use listener::{BundleListener, FrameworkListener, Listener, ListenerHandle, ServiceListener};
#[cfg(feature = "logging")]
pub use log::LogWriter;

pub(crate) use table::{ListenerMap, ListenerTable};
