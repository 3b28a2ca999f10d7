// ABOUTME: Client library for a remote codebox workspace
// ABOUTME: RPC over HTTP, a Socket.IO event channel and a shared connectivity status

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod methods;
pub mod rpc;
pub mod signal;
pub mod status;
pub mod transport;
pub mod workspace;

pub use channel::ChannelHandle;
pub use client::Codebox;
pub use config::{ClientConfig, CompatConfig, ReconnectConfig};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{CodeboxError, Result};
pub use events::{translate, EventBus, EventRouter, EventSink, LocalEvent, EVENTS_NAMESPACE};
pub use rpc::{RequestMode, RequestOptions, RpcClient, RpcEnvelope};
pub use signal::{ChannelSignal, Lifecycle, StatusPolicy};
pub use status::{StatusCallback, StatusEmitter, SubscriptionId};
pub use transport::{ChannelTarget, SignalStream, SocketIoTransport, Transport};
pub use workspace::{SharedWorkspace, Workspace, WorkspaceDescriptor, BASE_ADDRESS_KEY};
