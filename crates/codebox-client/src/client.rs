// ABOUTME: Codebox composition root wiring connection, RPC, events and status
// ABOUTME: Re-configures itself from a Workspace whenever the workspace changes

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::channel::ChannelHandle;
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::events::{EventBus, EventRouter, LocalEvent};
use crate::rpc::RpcClient;
use crate::status::{StatusCallback, StatusEmitter, SubscriptionId};
use crate::transport::{SocketIoTransport, Transport};
use crate::workspace::{Workspace, WorkspaceDescriptor};

/// Client for one codebox.
///
/// Owns one of each component. RPC bindings are reached through
/// [`Codebox::rpc`]; connectivity through [`Codebox::status`].
pub struct Codebox {
    connection: Arc<ConnectionManager>,
    rpc: RpcClient,
    router: Arc<EventRouter>,
    events: EventBus,
}

impl Codebox {
    /// Client speaking Socket.IO to the configured origin.
    ///
    /// A configured `base_address` is applied right away; the events
    /// namespace opens on the first `listen_events` or `configure`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let origin = config.origin_url()?;
        let transport = SocketIoTransport::new(origin, config.reconnect.clone());
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let origin = config.origin_url()?;
        let policy = config.status_policy();
        if policy.reconnect_failed_connected {
            tracing::warn!("compat.reconnect_failed_connected is on: a failed reconnection reports connected");
        }

        let connection = Arc::new(
            ConnectionManager::new(origin, transport, Arc::new(StatusEmitter::new()), policy)
                .with_listen_events(config.listen_events),
        );
        if let Some(base_address) = &config.base_address {
            connection.configure(&WorkspaceDescriptor::new(base_address.as_str()));
        }
        let rpc = RpcClient::new(Arc::clone(&connection), config.request_timeout())?;
        let events = EventBus::new();
        let router = Arc::new(EventRouter::new(
            Arc::clone(&connection),
            Arc::new(events.clone()),
        ));

        Ok(Self {
            connection,
            rpc,
            router,
            events,
        })
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn status(&self) -> &Arc<StatusEmitter> {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().get()
    }

    pub fn on_status(&self, listener: impl StatusCallback + 'static) -> SubscriptionId {
        self.status().subscribe(listener)
    }

    /// Receiver of translated `box:*` events.
    pub fn events(&self) -> broadcast::Receiver<LocalEvent> {
        self.events.subscribe()
    }

    pub fn proxy_url(&self, target: &str) -> Result<String> {
        self.connection.proxy_url(target)
    }

    /// Open the events namespace and republish its messages.
    pub async fn listen_events(&self) -> Result<ChannelHandle> {
        self.router.listen().await
    }

    /// Apply `descriptor`, then open the events namespace if requested.
    ///
    /// Returns the events handle when one was opened.
    pub async fn configure(&self, descriptor: &WorkspaceDescriptor) -> Result<Option<ChannelHandle>> {
        if self.connection.configure(descriptor) && descriptor.base_address.is_some() {
            return self.router.listen().await.map(Some);
        }
        Ok(None)
    }

    /// Configure from `workspace` now and again on each change.
    ///
    /// Event subscription is spawned on the current tokio runtime; outside a
    /// runtime only the connection config is applied.
    pub fn attach_workspace(&self, workspace: &dyn Workspace) {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::debug!("attaching workspace outside a runtime; events will not auto-start");
        }

        let connection = Arc::clone(&self.connection);
        let router = Arc::clone(&self.router);
        apply_descriptor(
            &connection,
            &router,
            WorkspaceDescriptor::from_workspace(workspace),
            runtime.as_ref(),
        );

        workspace.on_change(Box::new(move |descriptor: WorkspaceDescriptor| {
            apply_descriptor(&connection, &router, descriptor, runtime.as_ref());
        }));
    }
}

fn apply_descriptor(
    connection: &ConnectionManager,
    router: &Arc<EventRouter>,
    descriptor: WorkspaceDescriptor,
    runtime: Option<&Handle>,
) {
    let listen = connection.configure(&descriptor);
    if !listen || descriptor.base_address.is_none() {
        return;
    }
    let Some(runtime) = runtime else {
        return;
    };

    let router = Arc::clone(router);
    runtime.spawn(async move {
        if let Err(e) = router.listen().await {
            tracing::warn!(error = %e, "failed to listen for codebox events");
        }
    });
}
