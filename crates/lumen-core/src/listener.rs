//! Copy-on-write listener collections
//!
//! Delivery iterates a snapshot, so a listener may add or remove listeners
//! (including itself) while an event is being delivered.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`ListenerSet::add`], used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Set of shared listeners of one kind
pub struct ListenerSet<L: ?Sized> {
    entries: RwLock<Arc<Vec<(ListenerId, Arc<L>)>>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let mut updated = Vec::with_capacity(entries.len() + 1);
        updated.extend(entries.iter().cloned());
        updated.push((id, listener));
        *entries = Arc::new(updated);
        id
    }

    /// Returns false if the listener was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(entry, _)| *entry == id) {
            return false;
        }
        let updated = entries
            .iter()
            .filter(|(entry, _)| *entry != id)
            .cloned()
            .collect();
        *entries = Arc::new(updated);
        true
    }

    pub fn clear(&self) {
        *self.entries.write() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invoke `f` for every listener registered at the time of the call
    pub fn for_each(&self, mut f: impl FnMut(&L)) {
        let snapshot = Arc::clone(&self.entries.read());
        for (_, listener) in snapshot.iter() {
            f(listener);
        }
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    trait Ping: Send + Sync {
        fn ping(&self);
    }

    #[derive(Default)]
    struct Counter(Mutex<u32>);

    impl Ping for Counter {
        fn ping(&self) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn test_add_remove_clear() {
        let set: ListenerSet<dyn Ping> = ListenerSet::new();
        let counter = Arc::new(Counter::default());
        let first = set.add(counter.clone());
        set.add(counter.clone());
        assert_eq!(set.len(), 2);

        set.for_each(|l| l.ping());
        assert_eq!(*counter.0.lock(), 2);

        assert!(set.remove(first));
        assert!(!set.remove(first));
        assert_eq!(set.len(), 1);

        set.clear();
        assert!(set.is_empty());
    }

    struct SelfRemoving {
        set: Arc<ListenerSet<dyn Ping>>,
        id: Mutex<Option<ListenerId>>,
        calls: Mutex<u32>,
    }

    impl Ping for SelfRemoving {
        fn ping(&self) {
            *self.calls.lock() += 1;
            if let Some(id) = self.id.lock().take() {
                self.set.remove(id);
            }
        }
    }

    #[test]
    fn test_listener_can_remove_itself_during_delivery() {
        let set: Arc<ListenerSet<dyn Ping>> = Arc::new(ListenerSet::new());
        let listener = Arc::new(SelfRemoving {
            set: set.clone(),
            id: Mutex::new(None),
            calls: Mutex::new(0),
        });
        let other = Arc::new(Counter::default());
        let id = set.add(listener.clone());
        *listener.id.lock() = Some(id);
        set.add(other.clone());

        set.for_each(|l| l.ping());
        // The snapshot still reached the second listener
        assert_eq!(*other.0.lock(), 1);
        assert_eq!(set.len(), 1);

        set.for_each(|l| l.ping());
        assert_eq!(*listener.calls.lock(), 1);
        assert_eq!(*other.0.lock(), 2);
    }
}
