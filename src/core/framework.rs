use std::sync::Arc;

use crate::bundle::{Bundle, BundleHost};
use crate::config::Config;
use crate::core::BundleContext;
use crate::events::{EventManager, EventPublisher};
use crate::services::ServiceRegistry;

/// Shared runtime state every bundle context points at.
///
/// Cheap to clone. Holds the configuration, the host boundary, the event manager,
/// the bundle/framework event publisher and the service registry.
#[derive(Clone)]
pub struct Framework {
    config: Arc<Config>,
    host: Arc<dyn BundleHost>,
    events: Arc<EventManager>,
    publisher: Arc<EventPublisher>,
    registry: Arc<ServiceRegistry>,
}

impl Framework {
    pub fn new(config: Config, host: Arc<dyn BundleHost>) -> Self {
        let events = EventManager::new(config.event_thread_name.clone());
        let publisher = Arc::new(EventPublisher::new(Arc::clone(&events)));
        let registry = ServiceRegistry::new(&config, Arc::clone(&host), Arc::clone(&events));
        Self {
            config: Arc::new(config),
            host,
            events,
            publisher,
            registry,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn host(&self) -> &Arc<dyn BundleHost> {
        &self.host
    }

    #[inline]
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    #[inline]
    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Creates a fresh, valid context for `bundle`.
    pub fn create_context(&self, bundle: Bundle) -> BundleContext {
        BundleContext::new(bundle, self.clone())
    }
}
