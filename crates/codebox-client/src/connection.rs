// ABOUTME: Owns the codebox base address and the namespaced event channels
// ABOUTME: Feeds channel lifecycle signals into the shared connectivity status

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::channel::ChannelHandle;
use crate::error::{CodeboxError, Result};
use crate::signal::{Lifecycle, StatusPolicy};
use crate::status::StatusEmitter;
use crate::transport::{ChannelTarget, Transport};
use crate::workspace::WorkspaceDescriptor;

/// Appended to the base address to form the event channel resource.
pub const SOCKET_RESOURCE_SUFFIX: &str = "/socket.io";

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Where the client is attached. Replaced wholesale by `configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub base_address: Option<String>,
    pub virtual_path: String,
}

/// Event channel resource for a base address: leading separator stripped,
/// socket suffix appended.
pub fn connection_target_for(base_address: &str) -> String {
    let trimmed = base_address.strip_prefix('/').unwrap_or(base_address);
    format!("{trimmed}{SOCKET_RESOURCE_SUFFIX}")
}

pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// `reference` anchored at the server root, unless it is already an
/// absolute URL.
pub fn root_relative(reference: &str) -> String {
    if Url::parse(reference).is_ok() {
        reference.to_string()
    } else {
        format!("/{}", reference.trim_start_matches('/'))
    }
}

/// Resolve `base_address + path` against the root of `origin`. Absolute base
/// addresses ignore the origin.
pub fn resolve_url(origin: &Url, base_address: &str, path: &str) -> Result<Url> {
    Ok(origin.join(&root_relative(&format!("{base_address}{path}")))?)
}

type Bindings = Mutex<HashMap<String, ChannelHandle>>;

pub struct ConnectionManager {
    origin: Url,
    config: RwLock<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    status: Arc<StatusEmitter>,
    policy: StatusPolicy,
    listen_events: bool,
    bindings: Arc<Bindings>,
    next_channel_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        origin: Url,
        transport: Arc<dyn Transport>,
        status: Arc<StatusEmitter>,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            origin,
            config: RwLock::new(ConnectionConfig::default()),
            transport,
            status,
            policy,
            listen_events: true,
            bindings: Arc::new(Mutex::new(HashMap::new())),
            next_channel_id: AtomicU64::new(1),
        }
    }

    /// Default auto-subscribe preference for descriptors that set none.
    pub fn with_listen_events(mut self, listen_events: bool) -> Self {
        self.listen_events = listen_events;
        self
    }

    /// Replace the connection config from `descriptor`.
    ///
    /// Returns whether the default event namespace should be opened now.
    pub fn configure(&self, descriptor: &WorkspaceDescriptor) -> bool {
        let config = ConnectionConfig {
            base_address: descriptor.base_address.clone(),
            virtual_path: descriptor.virtual_path().to_string(),
        };
        tracing::info!(
            base_address = ?config.base_address,
            virtual_path = %config.virtual_path,
            "configuring codebox connection"
        );
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;

        descriptor.listen_events.unwrap_or(self.listen_events)
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn base_address(&self) -> Option<String> {
        self.config().base_address
    }

    pub fn virtual_path(&self) -> String {
        self.config().virtual_path
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn status(&self) -> &Arc<StatusEmitter> {
        &self.status
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    /// `None` until a base address is configured.
    pub fn connection_target_url(&self) -> Option<String> {
        self.base_address().as_deref().map(connection_target_for)
    }

    /// Absolute URL of the configured base address.
    pub fn base_url(&self) -> Result<Url> {
        let base_address = self.base_address().ok_or(CodeboxError::NotConfigured)?;
        resolve_url(&self.origin, &base_address, "")
    }

    /// URL through which the codebox proxies `target`. Pure formatting.
    pub fn proxy_url(&self, target: &str) -> Result<String> {
        let base_address = self.base_address().ok_or(CodeboxError::NotConfigured)?;
        Ok(format!("{}/proxy/{}", base_address, encode_uri_component(target)))
    }

    /// Open, or reuse, the channel for `namespace`.
    ///
    /// A bound channel is reused while it is open and points at the current
    /// target; `force_new` always opens a fresh one and rebinds.
    pub async fn open_channel(&self, namespace: &str, force_new: bool) -> Result<ChannelHandle> {
        let Some(resource) = self.connection_target_url() else {
            tracing::debug!(namespace, "event channel requested before configuration");
            return Err(CodeboxError::NotConfigured);
        };

        let mut bindings = self.bindings();
        if !force_new {
            if let Some(existing) = bindings.get(namespace) {
                if existing.is_open() && existing.target() == resource {
                    return Ok(existing.clone());
                }
            }
        }

        let target = ChannelTarget {
            resource: resource.clone(),
            namespace: namespace.to_string(),
        };
        let stream = self.transport.open(&target)?;

        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let handle = ChannelHandle::new(id, namespace, &resource);

        let status = Arc::clone(&self.status);
        let policy = self.policy;
        handle.spawn_pump(stream, move |signal| status.set(policy.status_for(signal)));
        handle.set_close_hook(closed_by_owner(
            Arc::downgrade(&self.bindings),
            namespace.to_string(),
            id,
            Arc::clone(&self.status),
            policy,
        ));

        bindings.insert(namespace.to_string(), handle.clone());
        tracing::info!(namespace, resource = %resource, id, force_new, "opened event channel");
        Ok(handle)
    }

    /// Currently bound channel for `namespace`, if any.
    pub fn channel(&self, namespace: &str) -> Option<ChannelHandle> {
        self.bindings().get(namespace).cloned()
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, ChannelHandle>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Close hook for channel `id`: a closed handle that is still the binding for
/// its namespace no longer carries events, so the status goes down with it.
fn closed_by_owner(
    bindings: Weak<Bindings>,
    namespace: String,
    id: u64,
    status: Arc<StatusEmitter>,
    policy: StatusPolicy,
) -> impl FnOnce() + Send + 'static {
    move || {
        let Some(bindings) = bindings.upgrade() else {
            return;
        };
        let bound = bindings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&namespace)
            .map(ChannelHandle::id);
        if bound == Some(id) {
            tracing::debug!(namespace = %namespace, id, "bound event channel closed");
            status.set(policy.status_for(Lifecycle::Disconnect));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ChannelSignal;
    use crate::transport::mock::MockTransport;
    use tokio::sync::mpsc;

    fn manager_with(policy: StatusPolicy) -> (ConnectionManager, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let manager = ConnectionManager::new(
            Url::parse("http://localhost:8000").unwrap(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(StatusEmitter::new()),
            policy,
        );
        (manager, transport)
    }

    fn manager() -> (ConnectionManager, Arc<MockTransport>) {
        manager_with(StatusPolicy::default())
    }

    fn status_feed(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.status().subscribe(move |connected: bool| {
            let _ = tx.send(connected);
        });
        rx
    }

    #[test]
    fn test_target_url_strips_leading_separator() {
        assert_eq!(connection_target_for("/ws1"), "ws1/socket.io");
        assert_eq!(connection_target_for("ws1"), "ws1/socket.io");
        assert_eq!(connection_target_for(""), "/socket.io");
        assert_eq!(
            connection_target_for("http://box.example.com/ws1"),
            "http://box.example.com/ws1/socket.io"
        );
    }

    #[test]
    fn test_configure_replaces_config_wholesale() {
        let (manager, _) = manager();
        assert_eq!(manager.connection_target_url(), None);

        let listen = manager.configure(&WorkspaceDescriptor::new("/ws1").with_path("/ws1"));
        assert!(listen);
        assert_eq!(
            manager.config(),
            ConnectionConfig {
                base_address: Some("/ws1".into()),
                virtual_path: "ws1".into(),
            }
        );
        assert_eq!(manager.connection_target_url().as_deref(), Some("ws1/socket.io"));

        manager.configure(&WorkspaceDescriptor::detached());
        assert_eq!(manager.config(), ConnectionConfig::default());
        assert_eq!(manager.connection_target_url(), None);
    }

    #[test]
    fn test_configure_listen_preference() {
        let (manager, _) = manager();
        let manager = manager.with_listen_events(false);

        assert!(!manager.configure(&WorkspaceDescriptor::new("/ws1")));
        assert!(manager.configure(&WorkspaceDescriptor::new("/ws1").with_listen_events(true)));
    }

    #[test]
    fn test_base_url_and_proxy_url() {
        let (manager, _) = manager();
        assert!(matches!(manager.base_url(), Err(CodeboxError::NotConfigured)));
        assert!(matches!(
            manager.proxy_url("http://x"),
            Err(CodeboxError::NotConfigured)
        ));

        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        assert_eq!(manager.base_url().unwrap().as_str(), "http://localhost:8000/ws1");
        assert_eq!(
            manager.proxy_url("http://localhost:3000/a b?x=1&y=(2)").unwrap(),
            "/ws1/proxy/http%3A%2F%2Flocalhost%3A3000%2Fa%20b%3Fx%3D1%26y%3D(2)"
        );
    }

    #[test]
    fn test_encode_uri_component_keeps_unreserved_marks() {
        assert_eq!(encode_uri_component("a-b_c.d!e~f*g'h(i)j"), "a-b_c.d!e~f*g'h(i)j");
        assert_eq!(encode_uri_component("é/"), "%C3%A9%2F");
    }

    #[test]
    fn test_resolve_url_relative_and_absolute() {
        let origin = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(
            resolve_url(&origin, "/ws1", "/git/status").unwrap().as_str(),
            "http://localhost:8000/ws1/git/status"
        );
        assert_eq!(
            resolve_url(&origin, "https://remote.example.com/box", "/auth/ping")
                .unwrap()
                .as_str(),
            "https://remote.example.com/box/auth/ping"
        );
    }

    #[test]
    fn test_resolve_url_ignores_origin_path() {
        let origin = Url::parse("http://box.example.com/app/").unwrap();
        assert_eq!(
            resolve_url(&origin, "/ws1", "/git/status").unwrap().as_str(),
            "http://box.example.com/ws1/git/status"
        );
        assert_eq!(
            resolve_url(&origin, "ws1", "/git/status").unwrap().as_str(),
            "http://box.example.com/ws1/git/status"
        );
        assert_eq!(root_relative("ws1/socket.io"), "/ws1/socket.io");
        assert_eq!(root_relative("/socket.io"), "/socket.io");
        assert_eq!(
            root_relative("https://box.example.com/ws1/socket.io"),
            "https://box.example.com/ws1/socket.io"
        );
    }

    #[tokio::test]
    async fn test_open_channel_unconfigured_fails_without_transport() {
        let (manager, transport) = manager();

        let err = manager.open_channel("events", false).await.unwrap_err();

        assert!(matches!(err, CodeboxError::NotConfigured));
        assert!(transport.opened().is_empty());
    }

    #[tokio::test]
    async fn test_open_channel_reuses_binding_unless_forced() {
        let (manager, transport) = manager();
        manager.configure(&WorkspaceDescriptor::new("/ws1"));

        let first = manager.open_channel("events", false).await.unwrap();
        let again = manager.open_channel("events", false).await.unwrap();
        assert_eq!(first.id(), again.id());
        assert_eq!(transport.opened().len(), 1);
        assert_eq!(
            transport.opened()[0],
            ChannelTarget {
                resource: "ws1/socket.io".into(),
                namespace: "events".into(),
            }
        );

        let forced = manager.open_channel("events", true).await.unwrap();
        assert_ne!(forced.id(), first.id());
        assert_eq!(transport.opened().len(), 2);
        assert_eq!(manager.channel("events").unwrap().id(), forced.id());

        let other = manager.open_channel("shells", false).await.unwrap();
        assert_eq!(other.namespace(), "shells");
        assert_eq!(transport.opened().len(), 3);
    }

    #[tokio::test]
    async fn test_reconfigure_opens_channel_against_new_target() {
        let (manager, transport) = manager();
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        let first = manager.open_channel("events", false).await.unwrap();

        manager.configure(&WorkspaceDescriptor::new("/ws2"));
        let second = manager.open_channel("events", false).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(second.target(), "ws2/socket.io");
        assert_eq!(transport.opened()[1].resource, "ws2/socket.io");
    }

    #[tokio::test]
    async fn test_scenario_configure_then_detach() {
        let (manager, _) = manager();
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        assert_eq!(manager.connection_target_url().as_deref(), Some("ws1/socket.io"));

        manager.configure(&WorkspaceDescriptor::detached());
        let err = manager.open_channel("events", false).await.unwrap_err();
        assert!(matches!(err, CodeboxError::NotConfigured));
    }

    #[tokio::test]
    async fn test_lifecycle_signals_drive_status() {
        let (manager, transport) = manager();
        let mut statuses = status_feed(&manager);
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        manager.open_channel("events", false).await.unwrap();

        let feed = transport.feed(0);
        for signal in Lifecycle::ALL {
            feed.send(ChannelSignal::Lifecycle(signal)).unwrap();
        }

        let mut seen = Vec::new();
        for _ in Lifecycle::ALL {
            seen.push(statuses.recv().await.unwrap());
        }
        // connect, connect_failed, reconnect, reconnect_failed, disconnect, error
        assert_eq!(seen, vec![true, false, true, false, false, false]);
        assert!(!manager.status().get());
    }

    #[tokio::test]
    async fn test_legacy_policy_reports_reconnect_failed_as_connected() {
        let (manager, transport) = manager_with(StatusPolicy::legacy());
        let mut statuses = status_feed(&manager);
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        manager.open_channel("events", false).await.unwrap();

        let feed = transport.feed(0);
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Disconnect)).unwrap();
        feed.send(ChannelSignal::Lifecycle(Lifecycle::ReconnectFailed)).unwrap();

        assert!(!statuses.recv().await.unwrap());
        assert!(statuses.recv().await.unwrap());
        assert!(manager.status().get());
    }

    #[tokio::test]
    async fn test_repeated_connect_signals_each_notify() {
        let (manager, transport) = manager();
        let mut statuses = status_feed(&manager);
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        manager.open_channel("events", false).await.unwrap();

        let feed = transport.feed(0);
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Connect)).unwrap();
        feed.send(ChannelSignal::Lifecycle(Lifecycle::Reconnect)).unwrap();

        assert!(statuses.recv().await.unwrap());
        assert!(statuses.recv().await.unwrap());
    }

    #[tokio::test]
    async fn test_ended_channel_is_replaced_on_next_open() {
        let (manager, transport) = manager();
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        let first = manager.open_channel("events", false).await.unwrap();

        transport.end(0);
        for _ in 0..100 {
            if !first.is_open() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!first.is_open());

        let second = manager.open_channel("events", false).await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_closing_bound_channel_reports_disconnected() {
        let (manager, transport) = manager();
        let mut statuses = status_feed(&manager);
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        let handle = manager.open_channel("events", false).await.unwrap();

        transport.feed(0).send(ChannelSignal::Lifecycle(Lifecycle::Connect)).unwrap();
        assert!(statuses.recv().await.unwrap());

        handle.close();
        assert!(!manager.status().get());
        assert!(!statuses.recv().await.unwrap());
    }

    #[tokio::test]
    async fn test_closing_replaced_channel_keeps_status() {
        let (manager, transport) = manager();
        let mut statuses = status_feed(&manager);
        manager.configure(&WorkspaceDescriptor::new("/ws1"));
        let stale = manager.open_channel("events", false).await.unwrap();
        manager.open_channel("events", true).await.unwrap();

        transport.feed(1).send(ChannelSignal::Lifecycle(Lifecycle::Connect)).unwrap();
        assert!(statuses.recv().await.unwrap());

        stale.close();
        assert!(manager.status().get());
        assert!(statuses.try_recv().is_err());
    }
}
