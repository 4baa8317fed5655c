//! Post-commit change notification.
//!
//! A [`Notifier`] fans an event out to synchronous listeners and to any
//! number of broadcast subscribers. Producers call [`Notifier::notify`] only
//! after the state change is durable and their own locks are released; the
//! listener list is snapshotted before dispatch, so a listener may register
//! or remove listeners without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

/// Default capacity of the broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Synchronous receiver of change events.
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

/// Handle returned by [`Notifier::listen`], used to remove the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fan-out of change events to listeners and broadcast subscribers.
pub struct Notifier<E> {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Listener<E>>)>>,
    sender: broadcast::Sender<E>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> Notifier<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a synchronous listener.
    pub fn listen(&self, listener: Arc<dyn Listener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Subscribe to a broadcast stream of events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Deliver an event to every listener, then to broadcast subscribers.
    pub fn notify(&self, event: E) {
        let snapshot: Vec<Arc<dyn Listener<E>>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener.on_event(&event);
        }
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<E: Clone + Send + 'static> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_receive_events_in_order() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.listen(Arc::new(move |e: &u32| sink.lock().unwrap().push(*e)));

        notifier.notify(1);
        notifier.notify(2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unlisten_stops_delivery() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        let id = notifier.listen(Arc::new(move |_: &u32| *sink.lock().unwrap() += 1));

        notifier.notify(1);
        assert!(notifier.unlisten(id));
        assert!(!notifier.unlisten(id));
        notifier.notify(2);
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn broadcast_subscribers_receive_events() {
        let notifier = Notifier::<String>::new();
        let mut rx = notifier.subscribe();
        notifier.notify("changed".to_string());
        assert_eq!(rx.try_recv().unwrap(), "changed");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listener_may_register_listeners_during_dispatch() {
        let notifier = Arc::new(Notifier::<u32>::new());
        let inner = Arc::clone(&notifier);
        notifier.listen(Arc::new(move |_: &u32| {
            inner.listen(Arc::new(|_: &u32| {}));
        }));
        notifier.notify(1);
        assert_eq!(notifier.listener_count(), 2);
    }
}
