// ABOUTME: Republishes messages from the "events" namespace as local box:* events
// ABOUTME: Name translation, the EventSink seam and a broadcast-backed EventBus

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::channel::ChannelHandle;
use crate::connection::ConnectionManager;
use crate::error::Result;

/// Namespace carrying server-pushed workspace events.
pub const EVENTS_NAMESPACE: &str = "events";
/// Message type of every pushed event.
pub const EVENT_MESSAGE: &str = "event";
pub const LOCAL_EVENT_PREFIX: &str = "box:";

const EVENT_BUS_CAPACITY: usize = 1024;

/// Local name of a server event: `git.diff.working` -> `box:git:diff:working`.
pub fn translate(name: &str) -> String {
    format!("{LOCAL_EVENT_PREFIX}{}", name.replace('.', ":"))
}

/// An event as republished locally. `payload` is the whole inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEvent {
    pub name: String,
    pub payload: Value,
}

impl LocalEvent {
    /// Build from an inbound message; `None` when it has no string `event` key.
    pub fn from_message(payload: &Value) -> Option<Self> {
        let original = payload.get("event")?.as_str()?;
        Some(Self {
            name: translate(original),
            payload: payload.clone(),
        })
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: LocalEvent);
}

/// Broadcast bus of translated events. Slow receivers lag rather than block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LocalEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: LocalEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no subscribers for codebox event");
        }
    }
}

/// Attaches the events namespace to an [`EventSink`].
pub struct EventRouter {
    connection: Arc<ConnectionManager>,
    sink: Arc<dyn EventSink>,
    /// Id of the handle currently carrying the sink listener.
    attached: Mutex<Option<u64>>,
}

impl EventRouter {
    pub fn new(connection: Arc<ConnectionManager>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            connection,
            sink,
            attached: Mutex::new(None),
        }
    }

    /// Open the events namespace and forward its messages to the sink.
    ///
    /// A handle reused across calls gets its listener only once. Only the
    /// latest handle is remembered; a replaced one is never returned again.
    pub async fn listen(&self) -> Result<ChannelHandle> {
        let handle = self.connection.open_channel(EVENTS_NAMESPACE, false).await?;

        let first_attach = self
            .attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle.id())
            != Some(handle.id());
        if first_attach {
            let sink = Arc::clone(&self.sink);
            handle.on(EVENT_MESSAGE, move |payload: &Value| route(sink.as_ref(), payload));
            tracing::debug!(id = handle.id(), resource = handle.target(), "listening for codebox events");
        }

        Ok(handle)
    }
}

fn route(sink: &dyn EventSink, payload: &Value) {
    match LocalEvent::from_message(payload) {
        Some(event) => {
            tracing::trace!(event = %event.name, "codebox event");
            sink.publish(event);
        }
        None => tracing::warn!(%payload, "dropping event message without an event name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodeboxError;
    use crate::signal::{ChannelSignal, Lifecycle, StatusPolicy};
    use crate::status::StatusEmitter;
    use crate::transport::mock::MockTransport;
    use crate::transport::Transport;
    use crate::workspace::WorkspaceDescriptor;
    use serde_json::json;
    use url::Url;

    fn router() -> (EventRouter, EventBus, Arc<MockTransport>, Arc<ConnectionManager>) {
        let transport = Arc::new(MockTransport::default());
        let connection = Arc::new(ConnectionManager::new(
            Url::parse("http://localhost:8000").unwrap(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(StatusEmitter::new()),
            StatusPolicy::default(),
        ));
        let bus = EventBus::new();
        let router = EventRouter::new(Arc::clone(&connection), Arc::new(bus.clone()));
        (router, bus, transport, connection)
    }

    fn event(payload: Value) -> ChannelSignal {
        ChannelSignal::Message {
            event: EVENT_MESSAGE.into(),
            payload,
        }
    }

    #[test]
    fn test_translate() {
        assert_eq!(translate("git.diff.working"), "box:git:diff:working");
        assert_eq!(translate("watch"), "box:watch");
        assert_eq!(translate(""), "box:");
        assert_eq!(translate("a..b"), "box:a::b");
    }

    #[test]
    fn test_local_event_keeps_whole_payload() {
        let payload = json!({"event": "users.join", "data": {"userId": "u1"}});
        let event = LocalEvent::from_message(&payload).unwrap();
        assert_eq!(event.name, "box:users:join");
        assert_eq!(event.payload, payload);

        assert!(LocalEvent::from_message(&json!({"data": 1})).is_none());
        assert!(LocalEvent::from_message(&json!({"event": 3})).is_none());
        assert!(LocalEvent::from_message(&json!("users.join")).is_none());
    }

    #[tokio::test]
    async fn test_listen_unconfigured_fails() {
        let (router, _, transport, _) = router();
        let err = router.listen().await.unwrap_err();
        assert!(matches!(err, CodeboxError::NotConfigured));
        assert!(transport.opened().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_republished_in_order() {
        let (router, bus, transport, connection) = router();
        let mut rx = bus.subscribe();
        connection.configure(&WorkspaceDescriptor::new("/ws1"));
        router.listen().await.unwrap();
        assert_eq!(transport.opened()[0].namespace, "events");

        let feed = transport.feed(0);
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Connect)).unwrap();
        feed.send(event(json!({"event": "git.diff.working", "n": 1}))).unwrap();
        feed.send(event(json!({"no_name": true}))).unwrap();
        feed.send(event(json!({"event": "watch", "n": 2}))).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "box:git:diff:working");
        assert_eq!(first.payload, json!({"event": "git.diff.working", "n": 1}));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.name, "box:watch");
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn test_repeated_listen_attaches_once() {
        let (router, bus, transport, connection) = router();
        let mut rx = bus.subscribe();
        connection.configure(&WorkspaceDescriptor::new("/ws1"));

        let first = router.listen().await.unwrap();
        let second = router.listen().await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.listener_count(EVENT_MESSAGE), 1);

        transport.feed(0).send(event(json!({"event": "a"}))).unwrap();
        transport.feed(0).send(event(json!({"event": "b"}))).unwrap();

        assert_eq!(rx.recv().await.unwrap().name, "box:a");
        assert_eq!(rx.recv().await.unwrap().name, "box:b");
    }

    #[tokio::test]
    async fn test_rebind_replaces_remembered_handle() {
        let (router, _bus, _transport, connection) = router();
        connection.configure(&WorkspaceDescriptor::new("/ws1"));
        let first = router.listen().await.unwrap();

        connection.configure(&WorkspaceDescriptor::new("/ws2"));
        let second = router.listen().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.listener_count(EVENT_MESSAGE), 1);
        assert_eq!(*router.attached.lock().unwrap(), Some(second.id()));

        router.listen().await.unwrap();
        assert_eq!(second.listener_count(EVENT_MESSAGE), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_signals_are_not_republished() {
        let (router, bus, transport, connection) = router();
        let mut rx = bus.subscribe();
        connection.configure(&WorkspaceDescriptor::new("/ws1"));
        router.listen().await.unwrap();

        let feed = transport.feed(0);
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Connect)).unwrap();
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Disconnect)).unwrap();
        feed.send(event(json!({"event": "after"}))).unwrap();

        assert_eq!(rx.recv().await.unwrap().name, "box:after");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bus_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(LocalEvent {
            name: "box:x".into(),
            payload: json!({}),
        });
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
