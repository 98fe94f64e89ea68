//! # LogWriter: simple event printer
//!
//! A minimal listener that prints every bundle, service and framework event it
//! receives to stdout. Use it for tests or demos.
//!
//! ## Example output
//! ```text
//! [framework-started]
//! [bundle-starting] bundle=echo [1]
//! [service-registered] id=1 interfaces=["Echo"] bundle=echo [1]
//! [bundle-started] bundle=echo [1]
//! [service-unregistering] id=1 interfaces=["Echo"] bundle=echo [1]
//! [framework-error] bundle=client [2] err="listener failed: boom"
//! ```

use crate::error::ListenerError;
use crate::events::{
    BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind, ServiceEvent,
    ServiceEventKind,
};
use crate::listeners::{BundleListener, FrameworkListener, ServiceListener};

/// Event writer listener.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BundleListener for LogWriter {
    fn bundle_changed(&self, e: &BundleEvent) -> Result<(), ListenerError> {
        let tag = match e.kind {
            BundleEventKind::Installed => "installed",
            BundleEventKind::Resolved => "resolved",
            BundleEventKind::LazyActivation => "lazy-activation",
            BundleEventKind::Starting => "starting",
            BundleEventKind::Started => "started",
            BundleEventKind::Stopping => "stopping",
            BundleEventKind::Stopped => "stopped",
            BundleEventKind::Updated => "updated",
            BundleEventKind::Unresolved => "unresolved",
            BundleEventKind::Uninstalled => "uninstalled",
        };
        println!("[bundle-{tag}] bundle={}", e.bundle);
        Ok(())
    }

    fn batch_begin(&self) -> Result<(), ListenerError> {
        println!("[bundle-batch-begin]");
        Ok(())
    }

    fn batch_end(&self) -> Result<(), ListenerError> {
        println!("[bundle-batch-end]");
        Ok(())
    }
}

impl ServiceListener for LogWriter {
    fn service_changed(&self, e: &ServiceEvent) -> Result<(), ListenerError> {
        let tag = match e.kind {
            ServiceEventKind::Registered => "registered",
            ServiceEventKind::Modified => "modified",
            ServiceEventKind::ModifiedEndMatch => "modified-endmatch",
            ServiceEventKind::Unregistering => "unregistering",
        };
        let owner = e
            .reference
            .bundle()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "[service-{tag}] id={} interfaces={:?} bundle={owner}",
            e.reference.id(),
            e.reference.interfaces(),
        );
        Ok(())
    }
}

impl FrameworkListener for LogWriter {
    fn framework_event(&self, e: &FrameworkEvent) -> Result<(), ListenerError> {
        let tag = match e.kind {
            FrameworkEventKind::Started => "started",
            FrameworkEventKind::Error => "error",
            FrameworkEventKind::Warning => "warning",
            FrameworkEventKind::Info => "info",
            FrameworkEventKind::Stopped => "stopped",
        };
        match (&e.bundle, &e.error) {
            (Some(b), Some(err)) => println!("[framework-{tag}] bundle={b} err={err:?}"),
            (Some(b), None) => println!("[framework-{tag}] bundle={b}"),
            (None, Some(err)) => println!("[framework-{tag}] err={err:?}"),
            (None, None) => println!("[framework-{tag}]"),
        }
        Ok(())
    }
}
