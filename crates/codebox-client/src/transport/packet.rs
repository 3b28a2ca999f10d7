// ABOUTME: Engine.IO and Socket.IO text packet codec
// ABOUTME: Decodes server frames and encodes namespace connect/disconnect

//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the subset a listening client needs: handshake, heartbeat,
//! namespace connect/disconnect, events and connect errors. Binary
//! attachments are recognised and skipped.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Reply to an Engine.IO ping.
pub const PONG: &str = "3";

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type '{0}'")]
    UnknownType(char),

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("invalid packet JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake carried by the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { namespace: String },
    Disconnect { namespace: String },
    Event {
        namespace: String,
        name: String,
        payload: Value,
    },
    Ack { namespace: String },
    ConnectError { namespace: String, data: Value },
    Binary { namespace: String },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace }
            | SocketPacket::ConnectError { namespace, .. }
            | SocketPacket::Binary { namespace } => namespace,
        }
    }
}

fn split_type(text: &str) -> Result<(char, &str), PacketError> {
    let kind = text.chars().next().ok_or(PacketError::Empty)?;
    Ok((kind, &text[kind.len_utf8()..]))
}

pub fn decode_engine(text: &str) -> Result<EnginePacket, PacketError> {
    let (kind, body) = split_type(text)?;
    let packet = match kind {
        '0' => EnginePacket::Open(serde_json::from_str(body)?),
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping(body.to_string()),
        '3' => EnginePacket::Pong(body.to_string()),
        '4' => EnginePacket::Message(body.to_string()),
        '5' => EnginePacket::Upgrade,
        '6' => EnginePacket::Noop,
        other => return Err(PacketError::UnknownType(other)),
    };
    Ok(packet)
}

pub fn decode_socket(text: &str) -> Result<SocketPacket, PacketError> {
    let (kind, mut rest) = split_type(text)?;

    // Binary packets carry "<attachments>-" before the namespace.
    if matches!(kind, '5' | '6') {
        if let Some(idx) = rest.find('-') {
            rest = &rest[idx + 1..];
        }
    }

    let namespace = if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => {
                let ns = &rest[..idx];
                rest = &rest[idx + 1..];
                ns.to_string()
            }
            None => {
                let ns = rest.to_string();
                rest = "";
                ns
            }
        }
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let ack_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let rest = &rest[ack_len..];

    if matches!(kind, '5' | '6') {
        return Ok(SocketPacket::Binary { namespace });
    }

    let data: Value = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest)?
    };

    let packet = match kind {
        '0' => SocketPacket::Connect { namespace },
        '1' => SocketPacket::Disconnect { namespace },
        '2' => {
            let Value::Array(items) = data else {
                return Err(PacketError::Malformed("event data is not an array".into()));
            };
            let mut items = items.into_iter();
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(PacketError::Malformed("event name missing".into())),
            };
            SocketPacket::Event {
                namespace,
                name,
                payload: items.next().unwrap_or(Value::Null),
            }
        }
        '3' => SocketPacket::Ack { namespace },
        '4' => SocketPacket::ConnectError { namespace, data },
        other => return Err(PacketError::UnknownType(other)),
    };
    Ok(packet)
}

/// Socket.IO connect request wrapped in an Engine.IO message.
pub fn encode_connect(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        "40".to_string()
    } else {
        format!("40{namespace},")
    }
}

pub fn encode_disconnect(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        "41".to_string()
    } else {
        format!("41{namespace},")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let packet = decode_engine(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();

        assert_eq!(
            packet,
            EnginePacket::Open(Handshake {
                sid: "abc".into(),
                upgrades: vec![],
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn test_decode_heartbeat_and_message() {
        assert_eq!(decode_engine("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(decode_engine("3hb").unwrap(), EnginePacket::Pong("hb".into()));
        assert_eq!(
            decode_engine("40/events,").unwrap(),
            EnginePacket::Message("0/events,".into())
        );
        assert!(matches!(decode_engine(""), Err(PacketError::Empty)));
        assert!(matches!(decode_engine("9"), Err(PacketError::UnknownType('9'))));
    }

    #[test]
    fn test_decode_namespaced_event() {
        let packet = decode_socket(
            r#"2/events,["event",{"event":"git.commit.done","data":{"sha":"abc"}}]"#,
        )
        .unwrap();

        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/events".into(),
                name: "event".into(),
                payload: json!({"event": "git.commit.done", "data": {"sha": "abc"}}),
            }
        );
    }

    #[test]
    fn test_decode_event_with_ack_id_and_no_payload() {
        let packet = decode_socket(r#"2/events,12["ping"]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/events".into(),
                name: "ping".into(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn test_decode_connect_variants() {
        assert_eq!(
            decode_socket("0").unwrap(),
            SocketPacket::Connect {
                namespace: "/".into()
            }
        );
        assert_eq!(
            decode_socket(r#"0/events,{"sid":"xyz"}"#).unwrap(),
            SocketPacket::Connect {
                namespace: "/events".into()
            }
        );
        assert_eq!(
            decode_socket("1/events,").unwrap().namespace(),
            "/events"
        );
    }

    #[test]
    fn test_decode_connect_error() {
        let packet = decode_socket(r#"4/events,{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::ConnectError {
                namespace: "/events".into(),
                data: json!({"message": "Not authorized"}),
            }
        );
    }

    #[test]
    fn test_decode_binary_event_is_skipped() {
        let packet = decode_socket(r#"51-/events,["upload",{"_placeholder":true,"num":0}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Binary {
                namespace: "/events".into()
            }
        );
    }

    #[test]
    fn test_decode_malformed_event() {
        assert!(matches!(
            decode_socket(r#"2/events,{"not":"array"}"#),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(
            decode_socket("2/events,[42]"),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(decode_socket("2/events,[oops"), Err(PacketError::Json(_))));
    }

    #[test]
    fn test_encode_namespace_packets() {
        assert_eq!(encode_connect("/events"), "40/events,");
        assert_eq!(encode_connect("/"), "40");
        assert_eq!(encode_disconnect("/events"), "41/events,");
    }
}
