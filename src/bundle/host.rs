//! # Hosting framework boundary.
//!
//! The runtime never installs or resolves bundles itself. Everything it needs to
//! know about the installed bundle population comes through [`BundleHost`]:
//!
//! ```text
//! BundleContext ──► BundleHost::bundle(id) / bundle_by_location / bundles
//! ServiceRegistry ──► BundleHost::is_assignable(requester, registrant, interface)
//! ContextDispatcher ──► BundleHost::on_listener_error(bundle, error)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{Bundle, BundleId};
use crate::error::ListenerError;

/// Lookups and hooks supplied by the hosting framework.
pub trait BundleHost: Send + Sync + 'static {
    /// Returns the installed bundle with the given id.
    fn bundle(&self, id: BundleId) -> Option<Bundle>;

    /// Returns the installed bundle with the given location.
    fn bundle_by_location(&self, location: &str) -> Option<Bundle>;

    /// Returns every installed bundle.
    fn bundles(&self) -> Vec<Bundle>;

    /// Returns a framework property (environment-level configuration).
    fn property(&self, _key: &str) -> Option<String> {
        None
    }

    /// Decides whether `requester` can use the `interface` of a service registered
    /// by `registrant`. Hosts without isolated type spaces keep the default.
    fn is_assignable(&self, _requester: &Bundle, _registrant: &Bundle, _interface: &str) -> bool {
        true
    }

    /// Runtime-error hook, called when a listener owned by `bundle` fails.
    ///
    /// Runs on the delivering thread before the failure is re-published as a
    /// framework `Error` event.
    fn on_listener_error(&self, bundle: &Bundle, error: &ListenerError) {
        tracing::warn!(bundle = %bundle, label = error.as_label(), "listener failed: {error}");
    }
}

/// In-memory bundle table.
///
/// Ids are allocated from 1 upwards in installation order.
#[derive(Default)]
pub struct MemoryHost {
    bundles: RwLock<Vec<Bundle>>,
    properties: RwLock<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a bundle and returns its handle.
    pub fn install(&self, symbolic_name: &str, location: &str) -> Bundle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let bundle = Bundle::new(id, symbolic_name, location);
        self.bundles.write().push(bundle.clone());
        bundle
    }

    /// Removes a bundle; returns `false` if it was not installed.
    pub fn uninstall(&self, id: BundleId) -> bool {
        let mut bundles = self.bundles.write();
        let before = bundles.len();
        bundles.retain(|b| b.id() != id);
        bundles.len() != before
    }

    /// Sets a framework property visible through [`BundleHost::property`].
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(key.into(), value.into());
    }
}

impl BundleHost for MemoryHost {
    fn bundle(&self, id: BundleId) -> Option<Bundle> {
        self.bundles.read().iter().find(|b| b.id() == id).cloned()
    }

    fn bundle_by_location(&self, location: &str) -> Option<Bundle> {
        self.bundles
            .read()
            .iter()
            .find(|b| b.location() == location)
            .cloned()
    }

    fn bundles(&self) -> Vec<Bundle> {
        self.bundles.read().clone()
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_allocates_increasing_ids() {
        let host = MemoryHost::new();
        let a = host.install("a", "file:a");
        let b = host.install("b", "file:b");
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(host.bundle_by_location("file:b"), Some(b.clone()));
        assert_eq!(host.bundles().len(), 2);

        assert!(host.uninstall(a.id()));
        assert!(!host.uninstall(a.id()));
        assert!(host.bundle(a.id()).is_none());
    }

    #[test]
    fn properties_round_trip() {
        let host = MemoryHost::new();
        assert!(host.property("org.osgi.framework.vendor").is_none());
        host.set_property("org.osgi.framework.vendor", "demo");
        assert_eq!(host.property("org.osgi.framework.vendor").as_deref(), Some("demo"));
    }
}
