// ABOUTME: Socket.IO transport over tokio-tungstenite WebSockets
// ABOUTME: Per-channel session task with heartbeat, lifecycle signals and reconnect backoff

//! Socket.IO client over a raw WebSocket (Engine.IO v4, no polling).
//!
//! One spawned task per channel owns the connection and reconnection
//! loop and feeds the signal stream. The task stops when the stream is
//! dropped or reconnection gives up.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::packet::{self, EnginePacket, SocketPacket};
use super::{ChannelTarget, SignalStream, Transport};
use crate::config::ReconnectConfig;
use crate::connection::root_relative;
use crate::error::{CodeboxError, Result};
use crate::signal::{ChannelSignal, Lifecycle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SIGNAL_BUFFER: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Liveness window used until the server handshake announces its own.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

/// WebSocket endpoint for a Socket.IO resource path.
///
/// `resource` is resolved against the root of `origin` (an absolute
/// resource replaces it), the scheme is mapped to ws/wss and the Engine.IO
/// query is set.
pub fn endpoint_url(origin: &Url, resource: &str) -> Result<Url> {
    let reference = root_relative(resource.trim_end_matches('/'));
    let mut url = origin.join(&format!("{reference}/"))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CodeboxError::InvalidUrl(format!(
                "unsupported event channel scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| CodeboxError::InvalidUrl(format!("cannot use scheme {scheme} for {url}")))?;

    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

pub struct SocketIoTransport {
    origin: Url,
    reconnect: ReconnectConfig,
}

impl SocketIoTransport {
    pub fn new(origin: Url, reconnect: ReconnectConfig) -> Self {
        Self { origin, reconnect }
    }
}

impl Transport for SocketIoTransport {
    fn open(&self, target: &ChannelTarget) -> Result<SignalStream> {
        let url = endpoint_url(&self.origin, &target.resource)?;
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);

        let session = Session {
            url,
            namespace: target.namespace_path(),
            reconnect: self.reconnect.clone(),
            tx,
        };
        tokio::spawn(session.run());

        Ok(ReceiverStream::new(rx).boxed())
    }
}

enum SessionEnd {
    /// The connection ended; `joined` tells whether the namespace was live.
    Closed { joined: bool },
    ConsumerGone,
}

struct Session {
    url: Url,
    namespace: String,
    reconnect: ReconnectConfig,
    tx: mpsc::Sender<ChannelSignal>,
}

impl Session {
    async fn run(self) {
        let mut ever_joined = false;
        let mut attempt: u32 = 0;

        loop {
            match self.connect().await {
                Ok(ws) => {
                    tracing::debug!(url = %self.url, namespace = %self.namespace, "websocket open");
                    match self.drive(ws, ever_joined).await {
                        SessionEnd::ConsumerGone => return,
                        SessionEnd::Closed { joined } => {
                            if joined {
                                ever_joined = true;
                                attempt = 0;
                                if !self.emit(Lifecycle::Disconnect).await {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, attempt, "event channel connect failed");
                    if !ever_joined && attempt == 0 && !self.emit(Lifecycle::ConnectFailed).await {
                        return;
                    }
                }
            }

            if !self.reconnect.enabled {
                return;
            }

            attempt += 1;
            if attempt > self.reconnect.max_attempts {
                self.emit(Lifecycle::ReconnectFailed).await;
                return;
            }

            let delay = self.reconnect.delay_for(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting event channel");
            tokio::select! {
                _ = self.tx.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self) -> std::result::Result<WsStream, String> {
        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", CONNECT_TIMEOUT.as_secs())),
        }
    }

    /// Run one connection until it ends. Emits connect/reconnect, messages
    /// and errors; the caller emits the closing disconnect.
    async fn drive(&self, ws: WsStream, ever_joined: bool) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut liveness = HANDSHAKE_TIMEOUT;
        let mut joined = false;

        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => {
                    let _ = sink.send(Message::Text(packet::encode_disconnect(&self.namespace).into())).await;
                    let _ = sink.close().await;
                    return SessionEnd::ConsumerGone;
                }
                next = tokio::time::timeout(liveness, stream.next()) => next,
            };

            let text = match next {
                Err(_) => {
                    tracing::warn!(namespace = %self.namespace, "event channel heartbeat timed out");
                    break;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    tracing::warn!(namespace = %self.namespace, error = %e, "event channel read failed");
                    if !self.emit(Lifecycle::Error).await {
                        return SessionEnd::ConsumerGone;
                    }
                    break;
                }
            };

            let engine = match packet::decode_engine(&text) {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring undecodable engine packet");
                    continue;
                }
            };

            match engine {
                EnginePacket::Open(handshake) => {
                    liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
                    let connect = packet::encode_connect(&self.namespace);
                    if let Err(e) = sink.send(Message::Text(connect.into())).await {
                        tracing::warn!(error = %e, "failed to request namespace");
                        break;
                    }
                }
                EnginePacket::Ping(data) => {
                    let pong = format!("{}{}", packet::PONG, data);
                    if sink.send(Message::Text(pong.into())).await.is_err() {
                        break;
                    }
                }
                EnginePacket::Close => break,
                EnginePacket::Message(body) => match packet::decode_socket(&body) {
                    Ok(socket) if socket.namespace() != self.namespace => {}
                    Ok(SocketPacket::Connect { .. }) => {
                        joined = true;
                        let signal = if ever_joined {
                            Lifecycle::Reconnect
                        } else {
                            Lifecycle::Connect
                        };
                        if !self.emit(signal).await {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                    Ok(SocketPacket::Event { name, payload, .. }) => {
                        let message = ChannelSignal::Message {
                            event: name,
                            payload,
                        };
                        if self.tx.send(message).await.is_err() {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                    Ok(SocketPacket::ConnectError { data, .. }) => {
                        tracing::warn!(namespace = %self.namespace, error = %data, "namespace connect refused");
                        if !self.emit(Lifecycle::Error).await {
                            return SessionEnd::ConsumerGone;
                        }
                        break;
                    }
                    Ok(SocketPacket::Disconnect { .. }) => break,
                    Ok(SocketPacket::Ack { .. }) | Ok(SocketPacket::Binary { .. }) => {}
                    Err(e) => tracing::warn!(error = %e, "ignoring undecodable socket packet"),
                },
                EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
            }
        }

        SessionEnd::Closed { joined }
    }

    /// False once the consumer has gone away.
    async fn emit(&self, signal: Lifecycle) -> bool {
        tracing::debug!(namespace = %self.namespace, signal = %signal, "event channel lifecycle");
        self.tx.send(ChannelSignal::Lifecycle(signal)).await.is_ok()
    }
}
