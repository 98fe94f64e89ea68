use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use bundlevisor::{
    BoxError, Bundle, BundleContext, BundleEvent, BundleEventKind, BundleListener, Config,
    FrameworkError, FrameworkEvent, FrameworkEventKind, FrameworkListener, ListenerError,
    MemoryHost, Properties, Runtime, ServiceFactory, ServiceObject, ServiceRegistration,
    ServiceSource, Value,
};

const WAIT: Duration = Duration::from_secs(5);

fn runtime() -> (Arc<MemoryHost>, Arc<Runtime>) {
    let host = Arc::new(MemoryHost::new());
    let runtime = Runtime::builder(Config::default())
        .with_host(host.clone())
        .build();
    (host, runtime)
}

fn context(runtime: &Runtime, host: &MemoryHost, name: &str) -> BundleContext {
    runtime
        .framework()
        .create_context(host.install(name, &format!("file:{name}")))
}

fn echo(tag: &'static str) -> ServiceObject {
    ServiceObject::new(tag).provides(["Echo"])
}

#[derive(Default)]
struct Tracking {
    made: AtomicUsize,
    released: AtomicUsize,
}

struct SharedTracking(Arc<Tracking>);

impl std::ops::Deref for SharedTracking {
    type Target = Tracking;
    fn deref(&self) -> &Tracking {
        &self.0
    }
}

impl ServiceFactory for SharedTracking {
    fn get_service(&self, _bundle: &Bundle, _reg: &ServiceRegistration) -> Result<ServiceObject, BoxError> {
        self.made.fetch_add(1, Ordering::SeqCst);
        Ok(ServiceObject::new(String::from("made")).provides(["Echo"]))
    }

    fn unget_service(&self, _bundle: &Bundle, _reg: &ServiceRegistration, _service: &ServiceObject) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn ranking_tie_goes_to_the_earlier_registration() {
    let (host, runtime) = runtime();
    let a = context(&runtime, &host, "a");
    let b = context(&runtime, &host, "b");
    let observer = context(&runtime, &host, "observer");

    let from_a = a
        .register_service(["Echo"], echo("a"), Properties::new().with("service.ranking", 5))
        .unwrap();
    let from_b = b
        .register_service(["Echo"], echo("b"), Properties::new().with("service.ranking", 5))
        .unwrap();
    assert!(from_a.id() < from_b.id());

    assert_eq!(observer.get_service_reference("Echo").unwrap(), Some(from_a.reference()));
    from_a.unregister().unwrap();
    assert_eq!(observer.get_service_reference("Echo").unwrap(), Some(from_b.reference()));
    runtime.shutdown();
}

#[test]
fn cached_object_survives_until_last_unget() {
    let (host, runtime) = runtime();
    let provider = context(&runtime, &host, "provider");
    let x = context(&runtime, &host, "x");

    let tracking = Arc::new(Tracking::default());
    let reg = provider
        .register_service(["Echo"], ServiceSource::factory(SharedTracking(tracking.clone())), Properties::new())
        .unwrap();
    let r = reg.reference();

    let first = x.get_service(&r).unwrap().unwrap();
    let second = x.get_service(&r).unwrap().unwrap();
    assert!(x.unget_service(&r).unwrap());
    let third = x.get_service(&r).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&third));
    assert_eq!(tracking.made.load(Ordering::SeqCst), 1);

    assert!(x.unget_service(&r).unwrap());
    assert_eq!(tracking.released.load(Ordering::SeqCst), 0);
    assert!(x.unget_service(&r).unwrap());
    assert_eq!(tracking.released.load(Ordering::SeqCst), 1);
    assert!(!x.unget_service(&r).unwrap());
    runtime.shutdown();
}

#[test]
fn concurrent_registrations_pick_the_highest_rank() {
    let (host, runtime) = runtime();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let ctx = context(&runtime, &host, &format!("p{i}"));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let rank = i32::try_from(i % 3).unwrap();
                let reg = ctx
                    .register_service(
                        ["Echo"],
                        ServiceObject::new(i).provides(["Echo"]),
                        Properties::new().with("service.ranking", rank),
                    )
                    .unwrap();
                (reg, ctx)
            })
        })
        .collect();
    let regs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let best = regs
        .iter()
        .map(|(reg, _)| reg.reference())
        .min_by(|a, b| b.ranking().cmp(&a.ranking()).then(a.id().cmp(&b.id())))
        .unwrap();
    let observer = context(&runtime, &host, "observer");
    assert_eq!(observer.get_service_reference("Echo").unwrap(), Some(best));
    assert_eq!(observer.get_service_references(Some("Echo"), None).unwrap().len(), threads);
    runtime.shutdown();
}

#[test]
fn lookups_survive_concurrent_ranking_changes() {
    let (host, runtime) = runtime();
    let provider = context(&runtime, &host, "provider");
    let observer = context(&runtime, &host, "observer");
    let regs: Arc<Vec<ServiceRegistration>> = Arc::new(
        (0..64)
            .map(|_| provider.register_service(["Echo"], echo("e"), Properties::new()).unwrap())
            .collect(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let mutators: Vec<_> = (0..4)
        .map(|t: usize| {
            let regs = Arc::clone(&regs);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut step = t;
                while !stop.load(Ordering::Relaxed) {
                    step = step.wrapping_mul(31).wrapping_add(7);
                    let reg = &regs[step % regs.len()];
                    let rank = i32::try_from(step % 13).unwrap() - 6;
                    reg.set_properties(Properties::new().with("service.ranking", rank)).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..300 {
        let found = observer.get_service_references(Some("Echo"), None).unwrap();
        assert_eq!(found.len(), 64);
        let _ = observer.get_service_reference("Echo").unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for mutator in mutators {
        mutator.join().unwrap();
    }

    let found = observer.get_service_references(Some("Echo"), None).unwrap();
    let keys: Vec<_> = found.iter().map(|r| (std::cmp::Reverse(r.ranking()), r.id())).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    runtime.shutdown();
}

#[test]
fn unregistered_reference_keeps_last_known_properties() {
    let (host, runtime) = runtime();
    let provider = context(&runtime, &host, "provider");
    let others: Vec<_> = (0..3).map(|i| context(&runtime, &host, &format!("c{i}"))).collect();

    let reg = provider
        .register_service(["Echo"], echo("p"), Properties::new().with("color", "red"))
        .unwrap();
    let held = reg.reference();
    reg.unregister().unwrap();

    for ctx in others.iter().chain(std::iter::once(&provider)) {
        assert!(ctx.get_service_references(Some("Echo"), None).unwrap().is_empty());
        assert!(ctx.get_service_references(None, Some("(color=red)")).unwrap().is_empty());
    }
    assert_eq!(held.property("color"), Some(Value::from("red")));
    assert_eq!(held.interfaces(), ["Echo".to_string()]);
    assert!(held.bundle().is_none());
    assert!(matches!(reg.unregister(), Err(FrameworkError::InvalidState { .. })));
    runtime.shutdown();
}

#[test]
fn every_operation_fails_after_close() {
    let (host, runtime) = runtime();
    let ctx = context(&runtime, &host, "closing");
    let reg = ctx.register_service(["Echo"], echo("c"), Properties::new()).unwrap();
    let r = reg.reference();

    ctx.close();
    ctx.close();

    let invalid = |res: Result<(), FrameworkError>| {
        assert!(matches!(res, Err(FrameworkError::InvalidContext { .. })), "{res:?}");
    };
    invalid(ctx.bundle().map(drop));
    invalid(ctx.property("k").map(drop));
    invalid(ctx.bundles().map(drop));
    invalid(ctx.data_file("f").map(drop));
    invalid(ctx.get_service_reference("Echo").map(drop));
    invalid(ctx.get_service_references(None, None).map(drop));
    invalid(ctx.get_all_service_references(None, None).map(drop));
    invalid(ctx.get_service(&r).map(drop));
    invalid(ctx.unget_service(&r).map(drop));
    invalid(ctx.registered_services().map(drop));
    invalid(ctx.services_in_use().map(drop));
    invalid(ctx.register_service(["Echo"], echo("x"), Properties::new()).map(drop));
    invalid(ctx.create_filter("(a=b)").map(drop));
    runtime.shutdown();
}

struct Kinds(Mutex<mpsc::Sender<BundleEventKind>>);

impl BundleListener for Kinds {
    fn bundle_changed(&self, event: &BundleEvent) -> Result<(), ListenerError> {
        let _ = self.0.lock().unwrap().send(event.kind);
        Ok(())
    }
}

struct Panicking;

impl FrameworkListener for Panicking {
    fn framework_event(&self, event: &FrameworkEvent) -> Result<(), ListenerError> {
        if event.kind == FrameworkEventKind::Error {
            panic!("error handler broke");
        }
        Ok(())
    }
}

struct Frameworks(Mutex<mpsc::Sender<FrameworkEventKind>>);

impl FrameworkListener for Frameworks {
    fn framework_event(&self, event: &FrameworkEvent) -> Result<(), ListenerError> {
        let _ = self.0.lock().unwrap().send(event.kind);
        Ok(())
    }
}

#[test]
fn async_bundle_listener_skips_transitional_events() {
    let (host, runtime) = runtime();
    let watcher = context(&runtime, &host, "watcher");
    let (tx, rx) = mpsc::channel();
    watcher.add_bundle_listener(Arc::new(Kinds(Mutex::new(tx)))).unwrap();

    let publisher = runtime.framework().publisher();
    let target = host.install("target", "file:target");
    publisher.publish_bundle_event(BundleEventKind::Starting, &target);
    publisher.publish_bundle_event(BundleEventKind::Started, &target);
    publisher.publish_bundle_event(BundleEventKind::Stopping, &target);
    publisher.publish_bundle_event(BundleEventKind::Stopped, &target);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), BundleEventKind::Started);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), BundleEventKind::Stopped);
    runtime.shutdown();
}

#[test]
fn panicking_error_handler_does_not_recurse() {
    let (tx, rx) = mpsc::channel();
    let host = Arc::new(MemoryHost::new());
    let runtime = Runtime::builder(Config::default())
        .with_host(host.clone())
        .with_framework_listeners(vec![
            Arc::new(Panicking) as Arc<dyn FrameworkListener>,
            Arc::new(Frameworks(Mutex::new(tx))),
        ])
        .build();

    let publisher = runtime.framework().publisher();
    publisher.publish_framework_event(FrameworkEvent::new(FrameworkEventKind::Error).with_error("boom"));
    publisher.publish_framework_event(FrameworkEvent::new(FrameworkEventKind::Info));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), FrameworkEventKind::Error);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), FrameworkEventKind::Info);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    runtime.shutdown();
}
