// File: trip-sync/src/connectivity.rs
// Purpose: Online/offline signal with transition callbacks

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Inner {
    state: watch::Sender<bool>,
    registry: Mutex<Registry>,
}

/// Process-wide connectivity state, fed by the platform signal.
///
/// Only two states exist. Callbacks fire once per genuine transition; reports
/// that repeat the current state are ignored. There is no debouncing.
#[derive(Clone)]
pub struct ConnectivityObserver {
    inner: Arc<Inner>,
}

impl ConnectivityObserver {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Feed a platform online/offline event
    pub fn report(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            return;
        }

        if online {
            tracing::info!("Network: online");
        } else {
            tracing::warn!("Network: offline");
        }

        // Call outside the lock so callbacks may subscribe or unsubscribe
        let callbacks: Vec<Callback> = self
            .registry()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            callback(online);
        }
    }

    /// Register a transition callback.
    ///
    /// The registration lives until `Subscription::unsubscribe` is called or
    /// the handle is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.push((id, Arc::new(callback)));

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver that observes every state change, for async consumers
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.registry().callbacks.len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Handle to a registered connectivity callback
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut registry = inner.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callback_fires_once_per_transition() {
        let observer = ConnectivityObserver::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = observer.subscribe(move |online| sink.lock().unwrap().push(online));

        observer.report(true);
        observer.report(false);
        observer.report(false);
        observer.report(true);
        observer.report(false);

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
        assert!(!observer.is_online());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observer = ConnectivityObserver::new(false);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = observer.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(observer.listener_count(), 1);

        observer.report(true);
        sub.unsubscribe();
        observer.report(false);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let observer = ConnectivityObserver::new(false);
        let mut rx = observer.watch();

        observer.report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
