//! # Runtime: bundle start/stop orchestration.
//!
//! [`Runtime`] owns the [`Framework`], a system context (bundle 0) and the
//! contexts of active bundles.
//!
//! ## Lifecycle
//! ```text
//! launch()        ──► framework STARTED
//!
//! start_bundle(b) ──► bundle STARTING (sync only)
//!                 ──► new BundleContext ──► activator.start(ctx)
//!                       ├─ Ok  ──► bundle STARTED
//!                       └─ Err ──► STOPPING, close context, STOPPED, Err(BundleActivator)
//!
//! stop_bundle(id) ──► bundle STOPPING ──► activator.stop(ctx) ──► close context ──► STOPPED
//!
//! shutdown()      ──► stop_bundle for every active bundle (latest first)
//!                 ──► framework STOPPED ──► close system context ──► close event manager
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::bundle::{Bundle, BundleActivator, BundleId};
use crate::config::Config;
use crate::error::FrameworkError;
use crate::events::{BundleEventKind, FrameworkEvent, FrameworkEventKind};

use super::{BundleContext, Framework, RuntimeBuilder};

/// Id of the system bundle.
pub const SYSTEM_BUNDLE_ID: BundleId = 0;

/// Bundles that are running, plus those whose activator is still starting.
#[derive(Default)]
struct Slots {
    active: BTreeMap<BundleId, BundleContext>,
    starting: HashSet<BundleId>,
}

/// Orchestrates bundle contexts over one [`Framework`].
pub struct Runtime {
    framework: Framework,
    system: BundleContext,
    slots: Mutex<Slots>,
    shut_down: AtomicBool,
}

impl Runtime {
    /// Creates a builder for a runtime with the given configuration.
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn new_internal(framework: Framework) -> Self {
        let system = framework.create_context(Bundle::new(
            SYSTEM_BUNDLE_ID,
            "system.bundle",
            "System Bundle",
        ));
        Self {
            framework,
            system,
            slots: Mutex::new(Slots::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    /// Context of the system bundle; valid until [`shutdown`](Self::shutdown).
    #[inline]
    pub fn system_context(&self) -> &BundleContext {
        &self.system
    }

    /// Publishes framework `Started`.
    pub fn launch(&self) {
        tracing::info!("runtime started");
        self.framework
            .publisher()
            .publish_framework_event(FrameworkEvent::new(FrameworkEventKind::Started));
    }

    /// Creates a context for `bundle` and runs its activator.
    ///
    /// Fails with [`FrameworkError::InvalidState`] if the bundle is already active
    /// or starting, or the runtime was shut down, and with
    /// [`FrameworkError::BundleActivator`] if the activator fails (the context is
    /// closed again).
    ///
    /// The bundle's slot is reserved before the activator runs, so concurrent
    /// starts of one bundle run its activator at most once.
    pub fn start_bundle(
        &self,
        bundle: &Bundle,
        activator: Arc<dyn BundleActivator>,
    ) -> Result<BundleContext, FrameworkError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(FrameworkError::invalid_state("runtime is shut down"));
        }
        {
            let mut slots = self.slots.lock();
            if slots.active.contains_key(&bundle.id()) || !slots.starting.insert(bundle.id()) {
                return Err(FrameworkError::invalid_state(format!("{bundle} is already active")));
            }
        }

        let publisher = self.framework.publisher();
        publisher.publish_bundle_event(BundleEventKind::Starting, bundle);
        let context = self.framework.create_context(bundle.clone());
        if let Err(err) = context.start(activator) {
            self.slots.lock().starting.remove(&bundle.id());
            publisher.publish_bundle_event(BundleEventKind::Stopping, bundle);
            context.close();
            publisher.publish_bundle_event(BundleEventKind::Stopped, bundle);
            return Err(err);
        }

        let stranded = {
            let mut slots = self.slots.lock();
            slots.starting.remove(&bundle.id());
            let stranded = self.shut_down.load(Ordering::Acquire);
            if !stranded {
                slots.active.insert(bundle.id(), context.clone());
            }
            stranded
        };
        if stranded {
            // shutdown ran while the activator was starting
            publisher.publish_bundle_event(BundleEventKind::Stopping, bundle);
            let _ = context.stop();
            context.close();
            publisher.publish_bundle_event(BundleEventKind::Stopped, bundle);
            return Err(FrameworkError::invalid_state("runtime is shut down"));
        }
        publisher.publish_bundle_event(BundleEventKind::Started, bundle);
        tracing::info!(bundle = %bundle, "bundle started");
        Ok(context)
    }

    /// Stops the activator of an active bundle and closes its context.
    ///
    /// The context is closed even if the activator fails; the failure is returned.
    pub fn stop_bundle(&self, id: BundleId) -> Result<(), FrameworkError> {
        let Some(context) = self.slots.lock().active.remove(&id) else {
            return Err(FrameworkError::invalid_state(format!("bundle {id} is not active")));
        };
        let bundle = context.bundle()?;
        let publisher = self.framework.publisher();
        publisher.publish_bundle_event(BundleEventKind::Stopping, &bundle);
        let result = context.stop();
        context.close();
        publisher.publish_bundle_event(BundleEventKind::Stopped, &bundle);
        tracing::info!(bundle = %bundle, "bundle stopped");
        result
    }

    /// Context of an active bundle.
    pub fn context(&self, id: BundleId) -> Option<BundleContext> {
        self.slots.lock().active.get(&id).cloned()
    }

    /// Active bundles, by id.
    pub fn active_bundles(&self) -> Vec<Bundle> {
        self.slots
            .lock()
            .active
            .values()
            .filter_map(|ctx| ctx.bundle().ok())
            .collect()
    }

    /// Stops every bundle, publishes framework `Stopped` and closes event delivery.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<BundleId> = self.slots.lock().active.keys().rev().copied().collect();
        for id in ids {
            if let Err(err) = self.stop_bundle(id) {
                self.framework.publisher().publish_framework_event(
                    FrameworkEvent::new(FrameworkEventKind::Error).with_error(err.to_string()),
                );
            }
        }
        self.framework
            .publisher()
            .publish_framework_event(FrameworkEvent::new(FrameworkEventKind::Stopped));
        self.framework.events().close();
        self.system.close();
        tracing::info!("runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::bundle::MemoryHost;
    use crate::error::{BoxError, ListenerError};
    use crate::events::BundleEvent;
    use crate::listeners::{BundleListener, FrameworkListener};
    use crate::services::{Properties, ServiceObject};

    struct Publishing;

    impl BundleActivator for Publishing {
        fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
            ctx.register_service(["Echo"], ServiceObject::new(()).provides(["Echo"]), Properties::new())?;
            Ok(())
        }

        fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct Broken;

    impl BundleActivator for Broken {
        fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
            ctx.register_service(["Half"], ServiceObject::new(()).provides(["Half"]), Properties::new())?;
            Err("cannot start".into())
        }

        fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
            panic!("stop must not run");
        }
    }

    /// Registers `Echo`, reports that it is running, then waits to be released.
    struct Gated {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl BundleActivator for Gated {
        fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
            ctx.register_service(["Echo"], ServiceObject::new(()).provides(["Echo"]), Properties::new())?;
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
            Ok(())
        }

        fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct Kinds(Mutex<mpsc::Sender<BundleEventKind>>);

    impl BundleListener for Kinds {
        fn bundle_changed(&self, event: &BundleEvent) -> Result<(), ListenerError> {
            let _ = self.0.lock().send(event.kind);
            Ok(())
        }
    }

    struct Frameworks(Mutex<mpsc::Sender<FrameworkEventKind>>);

    impl FrameworkListener for Frameworks {
        fn framework_event(&self, event: &FrameworkEvent) -> Result<(), ListenerError> {
            let _ = self.0.lock().send(event.kind);
            Ok(())
        }
    }

    fn runtime() -> (Arc<MemoryHost>, Arc<Runtime>) {
        let host = Arc::new(MemoryHost::new());
        let runtime = Runtime::builder(Config::default())
            .with_host(host.clone())
            .build();
        (host, runtime)
    }

    #[test]
    fn start_and_stop_publish_lifecycle_events() {
        let (host, runtime) = runtime();
        let (tx, rx) = mpsc::channel();
        runtime
            .system_context()
            .add_synchronous_bundle_listener(Arc::new(Kinds(Mutex::new(tx))))
            .unwrap();

        let bundle = host.install("echo", "file:echo");
        let ctx = runtime.start_bundle(&bundle, Arc::new(Publishing)).unwrap();
        assert_eq!(ctx.registered_services().unwrap().len(), 1);
        assert!(matches!(
            runtime.start_bundle(&bundle, Arc::new(Publishing)),
            Err(FrameworkError::InvalidState { .. })
        ));

        runtime.stop_bundle(bundle.id()).unwrap();
        assert!(!ctx.is_valid());
        assert!(runtime.context(bundle.id()).is_none());

        let kinds: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            kinds,
            vec![
                BundleEventKind::Starting,
                BundleEventKind::Started,
                BundleEventKind::Stopping,
                BundleEventKind::Stopped
            ]
        );
        runtime.shutdown();
    }

    #[test]
    fn concurrent_starts_of_one_bundle_run_the_activator_once() {
        let (host, runtime) = runtime();
        let bundle = host.install("gated", "file:gated");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let activator = Arc::new(Gated {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let (done_tx, done_rx) = mpsc::channel();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let starters: Vec<_> = (0..2)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                let bundle = bundle.clone();
                let activator = Arc::clone(&activator);
                let barrier = Arc::clone(&barrier);
                let done = done_tx.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let result = runtime.start_bundle(&bundle, activator).map(drop);
                    let _ = done.send(result);
                })
            })
            .collect();

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let rejected = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(rejected, Err(FrameworkError::InvalidState { .. })), "{rejected:?}");
        release_tx.send(()).unwrap();
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
        for starter in starters {
            starter.join().unwrap();
        }
        assert!(entered_rx.try_recv().is_err());
        assert_eq!(runtime.active_bundles(), vec![bundle.clone()]);

        runtime.stop_bundle(bundle.id()).unwrap();
        let left = runtime
            .system_context()
            .get_service_references(Some("Echo"), None)
            .unwrap();
        assert!(left.is_empty());
        runtime.shutdown();
    }

    #[test]
    fn failing_activator_is_wrapped_and_cleaned_up() {
        let (host, runtime) = runtime();
        let bundle = host.install("broken", "file:broken");

        let err = runtime.start_bundle(&bundle, Arc::new(Broken)).unwrap_err();
        match err {
            FrameworkError::BundleActivator { bundle, phase, .. } => {
                assert_eq!(bundle, "broken");
                assert_eq!(phase, crate::error::ActivatorPhase::Start);
            }
            other => panic!("unexpected error: {other}"),
        }
        let left = runtime
            .system_context()
            .get_service_references(Some("Half"), None)
            .unwrap();
        assert!(left.is_empty());
        assert!(runtime.active_bundles().is_empty());
        runtime.shutdown();
    }

    #[test]
    fn shutdown_stops_bundles_and_reports_stopped() {
        let (tx, rx) = mpsc::channel();
        let host = Arc::new(MemoryHost::new());
        let runtime = Runtime::builder(Config::default())
            .with_host(host.clone())
            .with_framework_listeners(vec![Arc::new(Frameworks(Mutex::new(tx)))])
            .build();
        runtime.launch();

        let a = host.install("a", "file:a");
        let b = host.install("b", "file:b");
        let ctx_a = runtime.start_bundle(&a, Arc::new(Publishing)).unwrap();
        let ctx_b = runtime.start_bundle(&b, Arc::new(Publishing)).unwrap();

        runtime.shutdown();
        runtime.shutdown();

        assert!(!ctx_a.is_valid());
        assert!(!ctx_b.is_valid());
        assert!(!runtime.system_context().is_valid());
        assert!(matches!(
            runtime.start_bundle(&a, Arc::new(Publishing)),
            Err(FrameworkError::InvalidState { .. })
        ));

        let seen: Vec<_> = std::iter::from_fn(|| rx.recv_timeout(Duration::from_secs(5)).ok())
            .take_while(|k| *k != FrameworkEventKind::Stopped)
            .collect();
        assert_eq!(seen, vec![FrameworkEventKind::Started]);
    }
}
