//! Runtime core: contexts, shared framework state and orchestration.
//!
//! Internal modules:
//! - [`context`]: the per-bundle handle and its event dispatcher;
//! - [`framework`]: shared state (config, host, events, registry) every context points at;
//! - [`runtime`]: bundle start/stop and shutdown;
//! - [`builder`]: assembles a [`Runtime`].

mod builder;
mod context;
mod framework;
mod runtime;

pub use builder::RuntimeBuilder;
pub use context::{BundleContext, ContextId};
pub use framework::Framework;
pub use runtime::{Runtime, SYSTEM_BUNDLE_ID};

pub(crate) use context::ContextInner;
