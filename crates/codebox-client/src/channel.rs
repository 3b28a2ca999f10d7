// ABOUTME: Handle to one open event channel and the task pumping its signals
// ABOUTME: Lifecycle signals go to a single handler, messages fan out to per-type listeners

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::signal::{ChannelSignal, Lifecycle};
use crate::transport::SignalStream;

pub type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// Cloneable handle to an open channel. Clones share listeners and state.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: u64,
    namespace: String,
    target: String,
    listeners: Mutex<HashMap<String, Vec<MessageListener>>>,
    open: AtomicBool,
    pump: Mutex<Option<AbortHandle>>,
    on_close: Mutex<Option<CloseHook>>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.namespace)
            .field("target", &self.inner.target)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ChannelHandle {
    pub(crate) fn new(id: u64, namespace: &str, target: &str) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id,
                namespace: namespace.to_string(),
                target: target.to_string(),
                listeners: Mutex::new(HashMap::new()),
                open: AtomicBool::new(true),
                pump: Mutex::new(None),
                on_close: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Connection target URL this channel was opened against.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// False once the transport stream has ended or the handle was closed.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Register `listener` for messages of type `event`.
    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners().get(event).map_or(0, Vec::len)
    }

    /// Stop pumping signals. Already-registered listeners stay attached but
    /// will not be called again.
    ///
    /// Closing a handle that was still open runs its close hook once.
    pub fn close(&self) {
        let was_open = self.inner.open.swap(false, Ordering::SeqCst);
        if let Some(pump) = self.pump().take() {
            pump.abort();
        }
        let hook = self.inner.on_close.lock().unwrap_or_else(|e| e.into_inner()).take();
        if was_open {
            if let Some(hook) = hook {
                hook();
            }
        }
        tracing::debug!(namespace = %self.inner.namespace, id = self.inner.id, "event channel closed");
    }

    /// Run `hook` when an open handle is closed by its owner. Not run when the
    /// stream ends on its own; the transport reports that itself.
    pub(crate) fn set_close_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.inner.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    pub(crate) fn dispatch(&self, event: &str, payload: &Value) {
        let listeners = self.listeners().get(event).cloned().unwrap_or_default();
        if listeners.is_empty() {
            tracing::trace!(namespace = %self.inner.namespace, event, "no listener for message");
        }
        for listener in listeners {
            listener(payload);
        }
    }

    /// Consume `stream` on a spawned task: lifecycle signals go to
    /// `on_lifecycle`, messages to the listeners of this handle, in order.
    pub(crate) fn spawn_pump<F>(&self, mut stream: SignalStream, on_lifecycle: F)
    where
        F: Fn(Lifecycle) + Send + 'static,
    {
        let handle = self.clone();
        let task = tokio::spawn(async move {
            while let Some(signal) = stream.next().await {
                match signal {
                    ChannelSignal::Lifecycle(lifecycle) => on_lifecycle(lifecycle),
                    ChannelSignal::Message { event, payload } => handle.dispatch(&event, &payload),
                }
            }
            handle.inner.open.store(false, Ordering::SeqCst);
            tracing::debug!(namespace = %handle.inner.namespace, "event channel stream ended");
        });
        *self.pump() = Some(task.abort_handle());
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Vec<MessageListener>>> {
        self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pump(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.inner.pump.lock().unwrap_or_else(|e| e.into_inner())
    }
}
