//! Service listener wrapper that applies a filter and a removal flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ListenerError;
use crate::events::{ServiceEvent, ServiceEventKind};
use crate::filter::Filter;
use crate::listeners::ServiceListener;

/// A [`ServiceListener`] plus its optional filter.
///
/// ## Delivery rules
/// - Removed listeners receive nothing, even from snapshots taken before removal.
/// - Without a filter every event is delivered.
/// - With a filter, an event is delivered if the properties it carries match.
/// - A `Modified` event whose new properties no longer match, but whose
///   previous properties did, is delivered as `ModifiedEndMatch`.
///
/// Matching uses the snapshots inside the event, never the live registration.
#[derive(Clone)]
pub struct FilteredServiceListener {
    listener: Arc<dyn ServiceListener>,
    filter: Option<Filter>,
    removed: Arc<AtomicBool>,
}

impl FilteredServiceListener {
    pub(crate) fn new(listener: Arc<dyn ServiceListener>, filter: Option<Filter>) -> Self {
        Self {
            listener,
            filter,
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    #[inline]
    pub fn listener(&self) -> &Arc<dyn ServiceListener> {
        &self.listener
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub(crate) fn same_listener(&self, other: &Arc<dyn ServiceListener>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.listener), Arc::as_ptr(other))
    }

    pub(crate) fn deliver(&self, event: &ServiceEvent) -> Result<(), ListenerError> {
        if self.is_removed() {
            return Ok(());
        }
        let Some(filter) = &self.filter else {
            return self.listener.service_changed(event);
        };
        if filter.matches(&event.properties) {
            return self.listener.service_changed(event);
        }
        if event.kind == ServiceEventKind::Modified
            && event.previous.as_ref().is_some_and(|prev| filter.matches(prev))
        {
            return self
                .listener
                .service_changed(&event.with_kind(ServiceEventKind::ModifiedEndMatch));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use parking_lot::Mutex;

    use super::*;
    use crate::bundle::Bundle;
    use crate::services::{Properties, ServiceObject, ServiceRegistration};

    struct Seen(Mutex<Vec<(ServiceEventKind, Option<String>)>>);

    impl ServiceListener for Seen {
        fn service_changed(&self, event: &ServiceEvent) -> Result<(), ListenerError> {
            let color = event.properties.get("color").and_then(|v| v.as_str()).map(str::to_string);
            self.0.lock().push((event.kind, color));
            Ok(())
        }
    }

    fn colored(color: &str) -> Properties {
        Properties::new().with("color", color)
    }

    fn lamp() -> ServiceRegistration {
        ServiceRegistration::new(
            1,
            vec!["Lamp".into()],
            ServiceObject::new(()).provides(["Lamp"]).into(),
            1,
            Bundle::new(1, "owner", "owner"),
            Weak::new(),
            colored("red"),
        )
    }

    fn listening(filter: &str) -> (Arc<Seen>, FilteredServiceListener) {
        let seen = Arc::new(Seen(Mutex::new(Vec::new())));
        let filter = Filter::parse(filter).unwrap();
        (seen.clone(), FilteredServiceListener::new(seen, Some(filter)))
    }

    #[test]
    fn overlapping_changes_match_their_own_properties() {
        let reg = lamp();
        reg.set_properties(colored("green")).unwrap();
        // red -> blue and blue -> green, delivered after the registration already shows green
        let first = ServiceEvent::modified(reg.reference(), colored("red"), colored("blue"));
        let second = ServiceEvent::modified(reg.reference(), colored("blue"), colored("green"));

        let (red, red_listener) = listening("(color=red)");
        red_listener.deliver(&second).unwrap();
        red_listener.deliver(&first).unwrap();
        assert_eq!(
            *red.0.lock(),
            vec![(ServiceEventKind::ModifiedEndMatch, Some("blue".to_string()))]
        );

        let (blue, blue_listener) = listening("(color=blue)");
        blue_listener.deliver(&first).unwrap();
        blue_listener.deliver(&second).unwrap();
        assert_eq!(
            *blue.0.lock(),
            vec![
                (ServiceEventKind::Modified, Some("blue".to_string())),
                (ServiceEventKind::ModifiedEndMatch, Some("green".to_string())),
            ]
        );
    }

    #[test]
    fn removed_listener_gets_nothing() {
        let reg = lamp();
        let (seen, listener) = listening("(color=red)");
        listener.mark_removed();
        listener
            .deliver(&ServiceEvent::new(ServiceEventKind::Registered, reg.reference()))
            .unwrap();
        assert!(seen.0.lock().is_empty());
    }
}
