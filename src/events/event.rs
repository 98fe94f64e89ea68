//! # Events delivered to bundle, service and framework listeners.
//!
//! Three families exist, each with its own kind enum and payload struct:
//! - [`BundleEvent`] / [`BundleEventKind`]: bundle lifecycle transitions
//! - [`ServiceEvent`] / [`ServiceEventKind`]: registration lifecycle of a service
//! - [`FrameworkEvent`] / [`FrameworkEventKind`]: runtime-wide notifications, including `Error`
//!
//! [`Event`] is the tagged union that travels through listener queues and the worker.
//! Bundle deliveries carry a [`BundleSignal`], which is either a change notification or
//! a batch marker.
//!
//! ## Ordering guarantees
//! Every payload gets a globally unique sequence number (`seq`) that increases
//! monotonically, so events observed on different threads can be put back in order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::bundle::Bundle;
use crate::services::{Properties, ServiceReference};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

#[inline]
fn next_seq() -> u64 {
    EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Bundle lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleEventKind {
    Installed,
    Resolved,
    /// Lazy activation was requested; synchronous listeners only.
    LazyActivation,
    /// The activator is about to run; synchronous listeners only.
    Starting,
    Started,
    /// The activator is about to be stopped; synchronous listeners only.
    Stopping,
    Stopped,
    Updated,
    Unresolved,
    Uninstalled,
}

impl BundleEventKind {
    /// Kinds that are never delivered to asynchronous bundle listeners.
    #[inline]
    pub fn is_synchronous_only(self) -> bool {
        matches!(
            self,
            BundleEventKind::Starting | BundleEventKind::Stopping | BundleEventKind::LazyActivation
        )
    }
}

/// A bundle changed state.
#[derive(Debug, Clone)]
pub struct BundleEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: BundleEventKind,
    /// The bundle that changed.
    pub bundle: Bundle,
}

impl BundleEvent {
    pub fn new(kind: BundleEventKind, bundle: Bundle) -> Self {
        Self {
            seq: next_seq(),
            at: SystemTime::now(),
            kind,
            bundle,
        }
    }
}

/// Service registration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    Registered,
    /// Properties changed and the listener's filter (if any) still matches.
    Modified,
    /// Properties changed so that the listener's filter no longer matches.
    ModifiedEndMatch,
    /// The service is being unregistered; it can still be released meanwhile.
    Unregistering,
}

/// A registered service changed.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: ServiceEventKind,
    /// The service the event is about.
    pub reference: ServiceReference,
    /// Service properties as of this event.
    pub properties: Properties,
    /// Properties replaced by this change; only set for `Modified`.
    pub previous: Option<Properties>,
}

impl ServiceEvent {
    /// Event carrying the service's properties as they are now.
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        let properties = reference.properties();
        Self {
            seq: next_seq(),
            at: SystemTime::now(),
            kind,
            reference,
            properties,
            previous: None,
        }
    }

    /// `Modified` event for a change from `previous` to `properties`.
    pub(crate) fn modified(reference: ServiceReference, previous: Properties, properties: Properties) -> Self {
        Self {
            seq: next_seq(),
            at: SystemTime::now(),
            kind: ServiceEventKind::Modified,
            reference,
            properties,
            previous: Some(previous),
        }
    }

    /// Same event (same `seq`), re-labelled with another kind.
    pub(crate) fn with_kind(&self, kind: ServiceEventKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

/// Runtime-wide notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventKind {
    Started,
    /// A listener or activator failed; `error` carries the message.
    Error,
    Warning,
    Info,
    Stopped,
}

/// A runtime-wide notification.
#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: FrameworkEventKind,
    /// Bundle the event relates to, if any.
    pub bundle: Option<Bundle>,
    /// Human-readable error message for `Error`/`Warning` events.
    pub error: Option<Arc<str>>,
}

impl FrameworkEvent {
    pub fn new(kind: FrameworkEventKind) -> Self {
        Self {
            seq: next_seq(),
            at: SystemTime::now(),
            kind,
            bundle: None,
            error: None,
        }
    }

    /// Attaches the related bundle.
    #[inline]
    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Attaches an error message.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// What a bundle listener receives.
#[derive(Debug, Clone)]
pub enum BundleSignal {
    /// A normal change notification.
    Changed(BundleEvent),
    /// A batch of bundle changes begins.
    BatchBegin,
    /// The current batch of bundle changes ended.
    BatchEnd,
}

/// Tagged union over every event family.
///
/// [`EventDispatcher`](crate::EventDispatcher) implementations `match` on it to pick the
/// listener method to call.
#[derive(Debug, Clone)]
pub enum Event {
    Bundle(BundleSignal),
    Service(ServiceEvent),
    Framework(FrameworkEvent),
}

impl Event {
    /// Returns `true` for framework `Error` events; failures while delivering those
    /// are never re-published.
    #[inline]
    pub fn is_framework_error(&self) -> bool {
        matches!(self, Event::Framework(ev) if ev.kind == FrameworkEventKind::Error)
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Event::Bundle(BundleSignal::Changed(_)) => "bundle_changed",
            Event::Bundle(BundleSignal::BatchBegin) => "bundle_batch_begin",
            Event::Bundle(BundleSignal::BatchEnd) => "bundle_batch_end",
            Event::Service(_) => "service_changed",
            Event::Framework(_) => "framework_event",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Bundle(BundleSignal::Changed(ev)) => {
                write!(f, "bundle {:?} {}", ev.kind, ev.bundle)
            }
            Event::Bundle(BundleSignal::BatchBegin) => f.write_str("bundle batch begin"),
            Event::Bundle(BundleSignal::BatchEnd) => f.write_str("bundle batch end"),
            Event::Service(ev) => write!(f, "service {:?} id={}", ev.kind, ev.reference.id()),
            Event::Framework(ev) => write!(f, "framework {:?}", ev.kind),
        }
    }
}

impl From<BundleEvent> for Event {
    fn from(ev: BundleEvent) -> Self {
        Event::Bundle(BundleSignal::Changed(ev))
    }
}

impl From<ServiceEvent> for Event {
    fn from(ev: ServiceEvent) -> Self {
        Event::Service(ev)
    }
}

impl From<FrameworkEvent> for Event {
    fn from(ev: FrameworkEvent) -> Self {
        Event::Framework(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let b = Bundle::new(1, "a", "loc:a");
        let first = BundleEvent::new(BundleEventKind::Installed, b.clone());
        let second = BundleEvent::new(BundleEventKind::Started, b);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn framework_error_detection() {
        let err: Event = FrameworkEvent::new(FrameworkEventKind::Error)
            .with_error("boom")
            .into();
        let started: Event = FrameworkEvent::new(FrameworkEventKind::Started).into();
        assert!(err.is_framework_error());
        assert!(!started.is_framework_error());
        assert!(!Event::Bundle(BundleSignal::BatchBegin).is_framework_error());
    }

    #[test]
    fn synchronous_only_kinds() {
        assert!(BundleEventKind::Starting.is_synchronous_only());
        assert!(BundleEventKind::LazyActivation.is_synchronous_only());
        assert!(!BundleEventKind::Started.is_synchronous_only());
    }
}
