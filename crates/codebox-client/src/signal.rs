// ABOUTME: Signals emitted by an event channel: lifecycle transitions and inbound messages
// ABOUTME: Also holds the lifecycle -> connectivity table applied by the connection manager

use std::fmt;

use serde_json::Value;

/// Transport lifecycle transitions of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Connect,
    ConnectFailed,
    Reconnect,
    ReconnectFailed,
    Disconnect,
    Error,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 6] = [
        Lifecycle::Connect,
        Lifecycle::ConnectFailed,
        Lifecycle::Reconnect,
        Lifecycle::ReconnectFailed,
        Lifecycle::Disconnect,
        Lifecycle::Error,
    ];

    /// Wire name used by Socket.IO clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Connect => "connect",
            Lifecycle::ConnectFailed => "connect_failed",
            Lifecycle::Reconnect => "reconnect",
            Lifecycle::ReconnectFailed => "reconnect_failed",
            Lifecycle::Disconnect => "disconnect",
            Lifecycle::Error => "error",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a channel's signal stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Lifecycle(Lifecycle),
    /// A server-pushed message: `event` is the message type, `payload` its body.
    Message { event: String, payload: Value },
}

/// Maps lifecycle signals to the connectivity flag.
///
/// `reconnect_failed_connected` restores the legacy behaviour where a failed
/// reconnection reports the channel as connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    pub reconnect_failed_connected: bool,
}

impl StatusPolicy {
    pub fn legacy() -> Self {
        Self {
            reconnect_failed_connected: true,
        }
    }

    pub fn status_for(&self, signal: Lifecycle) -> bool {
        match signal {
            Lifecycle::Connect | Lifecycle::Reconnect => true,
            Lifecycle::ConnectFailed | Lifecycle::Disconnect | Lifecycle::Error => false,
            Lifecycle::ReconnectFailed => self.reconnect_failed_connected,
        }
    }
}
