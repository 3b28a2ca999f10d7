// ABOUTME: Connectivity status flag with synchronous observers
// ABOUTME: Every set() notifies all listeners in registration order, repeated values included

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Observer of connectivity changes.
pub trait StatusCallback: Send + Sync {
    fn on_status(&self, connected: bool);
}

impl<F> StatusCallback for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_status(&self, connected: bool) {
        self(connected)
    }
}

/// Handle returned by [`StatusEmitter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = (SubscriptionId, Arc<dyn StatusCallback>);

/// Holds the single connectivity flag of a client.
///
/// Starts disconnected. There is no equality suppression: setting the same
/// value twice produces two notifications.
pub struct StatusEmitter {
    connected: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl Default for StatusEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusEmitter {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Store `connected` and notify every listener before returning.
    pub fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        tracing::info!(connected, "codebox status");

        // Snapshot so listeners can (un)subscribe without deadlocking.
        let snapshot: Vec<Arc<dyn StatusCallback>> = self
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener.on_status(connected);
        }
    }

    pub fn subscribe(&self, listener: impl StatusCallback + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
