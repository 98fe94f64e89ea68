//! Copy-on-write listener table.
//!
//! Mutations go through [`Arc::make_mut`]: when a snapshot still shares the map,
//! the table clones it first, so a snapshot is never changed after it was taken.

use std::collections::HashMap;
use std::sync::Arc;

use crate::listeners::{Listener, ListenerHandle};

/// Immutable view of a listener table.
pub(crate) type ListenerMap = Arc<HashMap<ListenerHandle, Listener>>;

#[derive(Clone, Default)]
pub(crate) struct ListenerTable {
    entries: ListenerMap,
}

impl ListenerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `listener`, or replaces the entry already holding the same listener
    /// object. Returns the handle plus the replaced entry, if any.
    pub(crate) fn insert(&mut self, listener: Listener) -> (ListenerHandle, Option<Listener>) {
        let existing = self
            .entries
            .iter()
            .find(|(_, l)| l.same_as(&listener))
            .map(|(h, _)| *h);
        let handle = existing.unwrap_or_else(ListenerHandle::next);
        let old = Arc::make_mut(&mut self.entries).insert(handle, listener);
        (handle, old)
    }

    pub(crate) fn remove(&mut self, handle: ListenerHandle) -> Option<Listener> {
        if !self.entries.contains_key(&handle) {
            return None;
        }
        Arc::make_mut(&mut self.entries).remove(&handle)
    }

    #[inline]
    pub(crate) fn contains(&self, handle: ListenerHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Current contents; later mutations do not affect the returned map.
    #[inline]
    pub(crate) fn snapshot(&self) -> ListenerMap {
        Arc::clone(&self.entries)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Listener> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::events::FrameworkEvent;
    use crate::listeners::FrameworkListener;

    struct Nop;

    impl FrameworkListener for Nop {
        fn framework_event(&self, _event: &FrameworkEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    #[test]
    fn snapshots_are_unaffected_by_later_mutation() {
        let mut table = ListenerTable::new();
        let (h1, _) = table.insert(Listener::Framework(Arc::new(Nop)));
        let snap = table.snapshot();

        let (h2, _) = table.insert(Listener::Framework(Arc::new(Nop)));
        assert!(table.remove(h1).is_some());

        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key(&h1));
        assert_eq!(table.len(), 1);
        assert!(table.contains(h2));
    }

    #[test]
    fn re_adding_the_same_listener_keeps_its_handle() {
        let mut table = ListenerTable::new();
        let l: Arc<dyn FrameworkListener> = Arc::new(Nop);
        let (h1, old) = table.insert(Listener::Framework(Arc::clone(&l)));
        assert!(old.is_none());
        let (h2, old) = table.insert(Listener::Framework(l));
        assert_eq!(h1, h2);
        assert!(old.is_some());
        assert_eq!(table.len(), 1);
        assert!(table.remove(ListenerHandle::next()).is_none());
    }
}
