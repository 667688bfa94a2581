//! Event fan-out to registered listeners

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`Broker::add`], used to remove the listener again
pub type ListenerId = u64;

/// Receives events of type `E`
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Delivers each notified event to every listener, in registration order.
///
/// Listeners are invoked synchronously on the notifying task and must not
/// block.
pub struct Broker<E> {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Listener<E>>)>>,
    next_id: AtomicU64,
}

impl<E> Broker<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener
    pub fn add<L>(&self, listener: L) -> ListenerId
    where
        L: Listener<E> + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn notify(&self, event: &E) {
        // Snapshot so listeners may add or remove listeners while running
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<E> Default for Broker<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_notify_in_order() {
        let broker = Broker::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        broker.add(move |e: &i32| s.lock().push(("first", *e)));
        let s = seen.clone();
        broker.add(move |e: &i32| s.lock().push(("second", *e)));

        broker.notify(&5);
        assert_eq!(*seen.lock(), vec![("first", 5), ("second", 5)]);
    }

    #[test]
    fn test_remove() {
        let broker = Broker::<i32>::new();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let id = broker.add(move |_: &i32| *c.lock() += 1);
        broker.notify(&1);
        assert!(broker.remove(id));
        assert!(!broker.remove(id));
        broker.notify(&2);

        assert_eq!(*count.lock(), 1);
        assert!(broker.is_empty());
    }
}
