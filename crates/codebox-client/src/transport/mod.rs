// ABOUTME: Event channel transport seam and channel targets
// ABOUTME: Includes a test-only mock transport fed from mpsc channels

//! Event channel transports.
//!
//! A [`Transport`] turns a channel target into a stream of
//! [`ChannelSignal`]s. Opening never waits for the network: connection
//! results arrive on the stream as lifecycle signals, in the order the
//! transport observes them.

pub mod packet;
mod socketio;

use futures::stream::BoxStream;

pub use socketio::{endpoint_url, SocketIoTransport};

use crate::error::Result;
use crate::signal::ChannelSignal;

pub type SignalStream = BoxStream<'static, ChannelSignal>;

/// Where a channel connects: the resource path derived from the base
/// address, and the logical namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub resource: String,
    pub namespace: String,
}

impl ChannelTarget {
    /// Namespace as it appears on the wire ("events" -> "/events").
    pub fn namespace_path(&self) -> String {
        format!("/{}", self.namespace.trim_start_matches('/'))
    }
}

pub trait Transport: Send + Sync {
    /// Start connecting to `target`. Must be called inside a tokio runtime.
    fn open(&self, target: &ChannelTarget) -> Result<SignalStream>;
}
