use std::sync::Arc;

use crate::bundle::{BundleHost, MemoryHost};
use crate::config::Config;
use crate::listeners::FrameworkListener;

use super::{framework::Framework, runtime::Runtime};

/// Builder for constructing a [`Runtime`] with optional features.
pub struct RuntimeBuilder {
    cfg: Config,
    host: Option<Arc<dyn BundleHost>>,
    listeners: Vec<Arc<dyn FrameworkListener>>,
}

impl RuntimeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            host: None,
            listeners: Vec::new(),
        }
    }

    /// Sets the hosting framework boundary.
    ///
    /// Without one, an empty [`MemoryHost`] is used.
    pub fn with_host(mut self, host: Arc<dyn BundleHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets framework listeners registered on the system context.
    ///
    /// They observe `Started`, `Stopped` and every `Error` the runtime publishes.
    pub fn with_framework_listeners(mut self, listeners: Vec<Arc<dyn FrameworkListener>>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds and returns the Runtime instance.
    ///
    /// This consumes the builder and initializes all runtime components:
    /// - Event manager (the worker starts lazily)
    /// - Event publisher and service registry
    /// - System context with the configured framework listeners
    pub fn build(self) -> Arc<Runtime> {
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(MemoryHost::new()) as Arc<dyn BundleHost>);
        let framework = Framework::new(self.cfg, host);
        let runtime = Arc::new(Runtime::new_internal(framework));

        let system = runtime.system_context();
        for listener in self.listeners {
            if let Err(err) = system.add_framework_listener(listener) {
                tracing::warn!("framework listener not added: {err}");
            }
        }
        runtime
    }
}
